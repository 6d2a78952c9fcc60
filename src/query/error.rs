//! Query error types
//!
//! Structured errors for plan validation and execution control: unknown
//! functions, type mismatches, rollup restrictions, malformed plans,
//! cancellation and timeouts.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create an unknown-function error
    pub fn unsupported_function(name: &str) -> Self {
        Self::new(
            QueryErrorKind::UnsupportedFunction,
            format!("aggregate function '{}' is not supported", name),
        )
    }

    /// Create an incompatible-type error
    pub fn incompatible_type(function: impl fmt::Display, data_type: impl fmt::Display) -> Self {
        Self::new(
            QueryErrorKind::IncompatibleType,
            format!("{} does not support data type {}", function, data_type),
        )
    }

    /// Create a rollup restriction error
    pub fn unsupported_rollup(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::UnsupportedRollup, message)
    }

    /// Create a malformed plan error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::MalformedPlan, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Plan content is invalid (bad level, bad filter shape)
    ValidationError,
    /// Aggregate function name is unknown
    UnsupportedFunction,
    /// Aggregate function cannot be applied to the series type
    IncompatibleType,
    /// Rollup requested with a function that cannot be merged across series
    UnsupportedRollup,
    /// Plan entry lists have mismatched lengths or are empty
    MalformedPlan,
    /// Query was cancelled by the caller
    Cancelled,
    /// Query exceeded its deadline
    Timeout,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::UnsupportedFunction => write!(f, "UnsupportedFunction"),
            QueryErrorKind::IncompatibleType => write!(f, "IncompatibleType"),
            QueryErrorKind::UnsupportedRollup => write!(f, "UnsupportedRollup"),
            QueryErrorKind::MalformedPlan => write!(f, "MalformedPlan"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
        }
    }
}
