//! Error types for decoding, the pipeline, sources and output.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure to recover plain text from an encoded message body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("encoded body is empty")]
    Empty,

    #[error("keyed archives are not supported")]
    KeyedArchive,

    #[error("no NSString found in encoded body")]
    MissingString,

    #[error("encoded body truncated at byte {0}")]
    Truncated(usize),

    #[error("unsupported length tag {0:#04x}")]
    BadLengthTag(u8),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Contract violations and configuration problems. Individual bad records
/// never produce one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("message {index} at {current} is earlier than its predecessor at {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("message store not found at {0}")]
    NotFound(PathBuf),

    #[error("cannot open message store at {path} (grant Full Disk Access to your terminal): {reason}")]
    PermissionDenied { path: PathBuf, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record in {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
