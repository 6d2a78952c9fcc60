//! tsagg - Statistics-pruned aggregation over time-series storage
//!
//! This library answers aggregate queries (count, sum, avg, min/max value,
//! first/last value, min/max time) over series stored as files of chunks of
//! pages, each level carrying summary statistics:
//! - Whole files, chunks or pages are answered from statistics when they lie
//!   entirely inside the query's time window
//! - Scans stop as soon as every requested aggregate is final
//! - Value predicates are evaluated by generating qualifying timestamps and
//!   looking every series up at those times
//! - Results can be rolled up to a path prefix level

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod filter;
pub mod numeric;
pub mod path;
pub mod statistics;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Aggregate functions, per-function state and per-series accumulators
pub mod aggregation;

/// Aggregation plans, execution and result assembly
pub mod query;

// Re-export main types
pub use aggregation::{AggregateFunction, AggregateResult};
pub use error::{Error, Result};
pub use path::SeriesPath;
pub use query::{AggregateDataSet, AggregationExecutor, AggregationPlan, QueryContext};
pub use types::{DataType, TimeRange, TimeValuePair, Value};
