//! Common error types for the kitchen services
//!
//! Only the fatal kinds live here. Inference failures, lost compare-and-set
//! races and unknown allergen codes are reported as data by the engine.

use thiserror::Error;

/// Common result type for kitchen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the kitchen services
#[derive(Error, Debug)]
pub enum Error {
    /// The backing datastore could not serve the request (fatal for the whole operation)
    #[error("Datastore unavailable: {0}")]
    DatastoreUnavailable(sqlx::Error),

    /// A stored row exists but cannot be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // A single undecodable row is an entity-level failure, not an outage
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
                Error::CorruptRecord(err.to_string())
            }
            other => Error::DatastoreUnavailable(other),
        }
    }
}

impl Error {
    /// True for errors that must abort a whole operation rather than one entity
    pub fn is_datastore_unavailable(&self) -> bool {
        matches!(self, Error::DatastoreUnavailable(_))
    }

    /// True when SQLite reported transient lock contention
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::DatastoreUnavailable(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound(format!("{} {}", kind, id))
    }

    pub fn corrupt(what: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::CorruptRecord(format!("{}: {}", what, err))
    }
}
