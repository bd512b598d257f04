//! Versioned encodings of the evolvable parts of payment rows.
//!
//! Every sub-object family is stored as a `(type_version, blob)` column pair.
//! Each family has its own version enum and each version names a frozen
//! blob schema. Evolving a family means adding a new version and a new
//! decode branch; existing schemas are never changed. Encoding always uses
//! the latest version of a family.

pub(crate) mod incoming;
pub(crate) mod lnurl;
pub(crate) mod onchain;
pub(crate) mod outgoing;

use std::str::FromStr;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown type version {0}")]
    UnknownTypeVersion(String),

    #[error("malformed blob: {0}")]
    MalformedBlob(String),

    #[error(
        "inconsistent status columns: completed_at={completed_at:?} \
         type={type_version:?} blob={has_blob}"
    )]
    InconsistentStatus {
        completed_at: Option<i64>,
        type_version: Option<String>,
        has_blob: bool,
    },

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::MalformedBlob(e.to_string())
    }
}

pub(crate) fn to_blob<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn from_blob<T: DeserializeOwned>(blob: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(blob)?)
}

/// Tag stored in the `*_type` column next to a blob.
pub(crate) trait TypeVersion: FromStr + Copy {
    fn tag(self) -> &'static str;
}

impl<T: FromStr + Copy + Into<&'static str>> TypeVersion for T {
    fn tag(self) -> &'static str {
        self.into()
    }
}

pub(crate) fn parse_type_version<T: FromStr>(value: &str) -> Result<T, CodecError> {
    value
        .parse()
        .map_err(|_| CodecError::UnknownTypeVersion(value.to_string()))
}

/// A terminal status spread over `(completed_at, type, blob)` columns.
pub(crate) struct StatusColumns<T> {
    pub completed_at: i64,
    pub type_version: T,
    pub blob: Vec<u8>,
}

impl<T: FromStr> StatusColumns<T> {
    /// Reads the status columns of a row.
    ///
    /// All three columns absent means the status is still pending. All three
    /// present means a terminal status. Any other combination is corrupt.
    pub(crate) fn from_columns(
        completed_at: Option<i64>,
        type_version: Option<String>,
        blob: Option<Vec<u8>>,
    ) -> Result<Option<Self>, CodecError> {
        match (completed_at, type_version, blob) {
            (None, None, None) => Ok(None),
            (Some(completed_at), Some(type_version), Some(blob)) => Ok(Some(StatusColumns {
                completed_at,
                type_version: parse_type_version(&type_version)?,
                blob,
            })),
            (completed_at, type_version, blob) => Err(CodecError::InconsistentStatus {
                completed_at,
                type_version,
                has_blob: blob.is_some(),
            }),
        }
    }
}
