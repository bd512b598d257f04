mod config;
mod error;
mod events;
mod ledger;
mod logger;
mod models;
mod persist;

pub use config::{LedgerConfig, Network, default_config};
pub use error::{LedgerError, LedgerResult};
pub use events::{ChangeKind, EventEmitter, PaymentChange, PaymentChangeListener};
pub use ledger::PaymentsDb;
pub use logger::{LogEntry, LogListener, init_logging};
pub use models::*;
pub use persist::{codec::CodecError, path::default_storage_path};
