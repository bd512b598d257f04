use thiserror::Error;

use crate::persist::codec::CodecError;

pub type LedgerResult<T, E = LedgerError> = Result<T, E>;

/// Errors that can occur during ledger operations
#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    #[error("Underlying implementation error: {0}")]
    Implementation(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitializationError(String),

    #[error("Failed to serialize/deserialize data: {0}")]
    Serialization(String),

    /// A stored row could not be decoded by any known or legacy path.
    #[error("Unreadable row {id} in {table} ({type_version}): {reason}")]
    UnreadableRow {
        table: &'static str,
        id: String,
        type_version: String,
        reason: String,
    },

    #[error("Unknown {parent} {id}")]
    ReferentialViolation { parent: &'static str, id: String },

    #[error("Payment already exists: {0}")]
    DuplicatePayment(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    pub(crate) fn unreadable(
        table: &'static str,
        id: impl ToString,
        type_version: impl ToString,
        err: &CodecError,
    ) -> Self {
        LedgerError::UnreadableRow {
            table,
            id: id.to_string(),
            type_version: type_version.to_string(),
            reason: err.to_string(),
        }
    }

    /// Maps a constraint violation raised while inserting `id` to a typed error.
    pub(crate) fn from_insert(err: rusqlite::Error, parent: &'static str, id: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    return LedgerError::DuplicatePayment(id.to_string());
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return LedgerError::ReferentialViolation {
                        parent,
                        id: id.to_string(),
                    };
                }
                _ => {}
            }
        }
        err.into()
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(value: rusqlite::Error) -> Self {
        LedgerError::Implementation(value.to_string())
    }
}

impl From<rusqlite_migration::Error> for LedgerError {
    fn from(value: rusqlite_migration::Error) -> Self {
        LedgerError::InitializationError(value.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<CodecError> for LedgerError {
    fn from(e: CodecError) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for LedgerError {
    fn from(e: tokio::task::JoinError) -> Self {
        LedgerError::Implementation(format!("ledger worker failed: {e}"))
    }
}

#[macro_export]
macro_rules! ensure_ledger {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LedgerError::from(rusqlite::Error::InvalidQuery);
        assert!(matches!(err, LedgerError::Implementation(_)));
        assert!(
            err.to_string()
                .starts_with("Underlying implementation error: ")
        );

        let err = LedgerError::from(CodecError::InconsistentStatus {
            completed_at: Some(10),
            type_version: None,
            has_blob: false,
        });
        assert_eq!(
            err.to_string(),
            "Failed to serialize/deserialize data: inconsistent status columns: \
             completed_at=Some(10) type=None blob=false"
        );
    }
}
