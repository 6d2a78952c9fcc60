//! Aggregation query engine
//!
//! # Architecture
//!
//! ```text
//! AggregationPlan
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Validate   │  functions, types, rollup, filter shape
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  statistics scan per series, or timestamp generation
//! └─────────────┘  plus lookups when a value filter is present
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Assemble   │  entry order or rollup, JSON / CSV / table
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tsagg::config::QueryConfig;
//! use tsagg::path::SeriesPath;
//! use tsagg::query::{AggregationExecutor, AggregationPlan, QueryResourceManager};
//! use tsagg::storage::{Layout, MemoryStorage};
//! use tsagg::types::{DataType, TimeValuePair, Value};
//!
//! let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
//! let points: Vec<_> = (0..100).map(|i| TimeValuePair::new(i, Value::Int64(i))).collect();
//! let storage = Arc::new(MemoryStorage::new());
//! storage.add_files(Layout::default().split(&path, DataType::Int64, &points, 1).unwrap());
//!
//! let plan = AggregationPlan::new()
//!     .aggregate(path.clone(), "count", DataType::Int64)
//!     .aggregate(path, "sum", DataType::Int64);
//! let resources = Arc::new(QueryResourceManager::new(storage));
//! let mut executor = AggregationExecutor::new(plan, resources, QueryConfig::default());
//! let ctx = executor.new_context();
//!
//! let data = executor.execute(&ctx).unwrap();
//! assert_eq!(
//!     data.as_record().unwrap().values(),
//!     vec![Some(Value::Int64(100)), Some(Value::Double(4950.0))]
//! );
//! ```

/// Per-query context, resource tracking and release
pub mod context;
/// Query errors
pub mod error;
/// Plan execution
pub mod executor;
/// Aggregation plans and validation
pub mod plan;
/// Result records, rollup and output formats
pub mod result;
/// Single-series statistics scan
pub mod scan;
/// Timestamp generation for value filters
pub mod timegen;

pub use context::{CancelHandle, QueryContext, QueryGuard, QueryResourceManager};
pub use error::{QueryError, QueryErrorKind};
pub use executor::{group_by_series, AggregationExecutor, ExecutionStats, SeriesGroup};
pub use plan::{AggregationPlan, FilterKind};
pub use result::{
    AggregateDataSet, AggregateField, AggregateRecord, ResultFormat, RollupField, RollupRecord,
};
pub use scan::{aggregate_from_reader, aggregate_one_series, ScanOptions, ScanStats, SeriesRequest};
pub use timegen::{split_global_time, ServerTimeGenerator, TimestampGenerator};
