//! Error types for the aggregation engine
//!
//! Three failure families reach the caller of a query:
//! - storage access failures ([`StorageError`]), never retried here
//! - query processing failures ([`QueryError`]), raised before scanning where possible
//! - reader contract violations ([`Error::Consistency`]), which abort the query

use crate::query::error::QueryError;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Storage access failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Query processing failed
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// A reader broke the file/chunk/page contract
    ///
    /// Fatal: aggregates computed past this point could be wrong.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a consistency violation
    pub fn consistency(message: impl Into<String>) -> Self {
        Error::Consistency(message.into())
    }

    /// Whether this error was produced by query validation or execution control
    pub fn is_query_error(&self) -> bool {
        matches!(self, Error::Query(_))
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data source for a series could not be opened
    #[error("Data source unavailable for {path}: {reason}")]
    Unavailable {
        /// Series path that was requested
        path: String,
        /// Why the source could not be opened
        reason: String,
    },

    /// Metadata is corrupted
    #[error("Corrupted metadata: {0}")]
    CorruptedMetadata(String),

    /// Stored data does not match the declared series type
    #[error("Type mismatch for {path}: declared {declared}, stored {stored}")]
    TypeMismatch {
        /// Series path
        path: String,
        /// Type declared by the query
        declared: String,
        /// Type found in storage
        stored: String,
    },

    /// Storage has been closed
    #[error("Storage closed")]
    Closed,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
