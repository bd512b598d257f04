use std::{fs::OpenOptions, path::Path};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{FormatFields, format::Writer},
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::error::{LedgerError, LedgerResult};

const DEFAULT_LOG_FILTER: &str = "debug,payments_ledger=debug,rusqlite_migration=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub line: String,
    pub level: String,
}

/// Receives the log lines of the ledger, for hosts that keep their own logs.
pub trait LogListener: Send + Sync {
    fn log(&self, entry: LogEntry);
}

pub(crate) struct GlobalLedgerLogger {
    pub(crate) log_listener: Option<Box<dyn LogListener>>,
}

impl<S> Layer<S> for GlobalLedgerLogger
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().level() <= &Level::INFO {
            if let Some(s) = self.log_listener.as_ref() {
                let mut buf = String::new();
                let writer = Writer::new(&mut buf);

                if tracing_subscriber::fmt::format::DefaultFields::new()
                    .format_fields(writer, event)
                    .is_ok()
                {
                    s.log(LogEntry {
                        line: buf,
                        level: event.metadata().level().to_string(),
                    });
                }
            }
        }
    }
}

/// Installs the global subscriber, appending to `<log_dir>/ledger.log`.
pub fn init_logging(
    log_dir: &Path,
    app_logger: Option<Box<dyn LogListener>>,
    log_filter: Option<String>,
) -> LedgerResult<()> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| LedgerError::InitializationError(e.to_string()))?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("ledger.log"))
        .map_err(|e| LedgerError::InitializationError(e.to_string()))?;

    let filter = log_filter.unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_line_number(true)
                .with_writer(log_file),
        )
        .with(GlobalLedgerLogger {
            log_listener: app_logger,
        })
        .try_init()
        .map_err(|e| LedgerError::InitializationError(format!("Logging already set up: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct CollectingListener(Arc<Mutex<Vec<LogEntry>>>);

    impl LogListener for CollectingListener {
        fn log(&self, entry: LogEntry) {
            self.0.lock().unwrap().push(entry);
        }
    }

    #[test]
    fn test_listener_receives_info_and_above() {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(GlobalLedgerLogger {
            log_listener: Some(Box::new(CollectingListener(entries.clone()))),
        });

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("not forwarded");
            tracing::info!("payment received");
            tracing::warn!("skipping row");
        });

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, "INFO");
        assert!(entries[0].line.contains("payment received"));
        assert_eq!(entries[1].level, "WARN");
    }
}
