//! Storage layer as seen by the aggregation engine
//!
//! # Architecture
//!
//! ```text
//! StorageEngine ──query_data_source──► QueryDataSource (files in time order, TTL)
//!                                           │
//!                                           ▼
//!                              SeriesAggregateReader (file → chunk → page cursor)
//!                                           │
//!                                           └─► SeriesReaderByTimestamp (point lookup)
//! ```
//!
//! # Key Components
//!
//! - **TsFileResource**: File holding chunks and statistics for many series
//! - **MemoryStorage**: In-process [`StorageEngine`] with TTLs and open counters
//! - **AggregateReader**: Cursor contract with statistics short-circuits
//! - **ReaderByTimestamp**: Lookups at ascending timestamps

/// Point lookup by timestamp
pub mod by_timestamp;
/// Statistics-bearing series readers
pub mod reader;
/// Storage engine seam and data sources
pub mod source;
/// File, chunk and page model
pub mod tsfile;

pub use by_timestamp::{ReaderByTimestamp, SeriesReaderByTimestamp};
pub use reader::{AggregateReader, ChunkMetadataCache, ReaderOptions, SeriesAggregateReader};
pub use source::{MemoryStorage, QueryDataSource, StorageEngine, TsFileFilter};
pub use tsfile::{Chunk, Layout, Page, PageData, TsFileBuilder, TsFileResource};
