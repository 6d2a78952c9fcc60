//! Per-query context and resource tracking
//!
//! [`QueryContext`] carries what every series scan of one query shares: the
//! query id, the query timestamp used for TTL narrowing, cancellation and
//! deadline, and the chunk metadata cache.
//!
//! [`QueryResourceManager`] hands out data sources and remembers which files
//! each query holds. [`QueryGuard`] releases them when dropped, so release
//! happens exactly once on success, error and panic unwinding alike.

use crate::error::Result;
use crate::filter::TimeFilter;
use crate::path::SeriesPath;
use crate::query::error::QueryError;
use crate::storage::reader::ChunkMetadataCache;
use crate::storage::source::{QueryDataSource, StorageEngine};
use crate::storage::tsfile::TsFileResource;
use crate::types::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Query context
// ============================================================================

/// Shared state of one query
#[derive(Debug)]
pub struct QueryContext {
    id: u64,
    query_time: Timestamp,
    start_time: Instant,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    metadata: Arc<ChunkMetadataCache>,
}

impl QueryContext {
    /// Create a context stamped with the current wall-clock time
    pub fn new() -> Self {
        Self {
            id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
            query_time: chrono::Utc::now().timestamp_millis(),
            start_time: Instant::now(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            metadata: Arc::new(ChunkMetadataCache::new()),
        }
    }

    /// Override the query timestamp (TTL cut-off is `query_time - ttl`)
    pub fn with_query_time(mut self, query_time: Timestamp) -> Self {
        self.query_time = query_time;
        self
    }

    /// Fail the query once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.start_time + timeout);
        self
    }

    /// Query identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Query timestamp in milliseconds
    pub fn query_time(&self) -> Timestamp {
        self.query_time
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Handle that can cancel the query from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    /// Cancel the query
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the query was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the deadline has passed
    pub fn is_timed_out(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Fail if the query was cancelled or ran out of time
    pub fn check(&self) -> std::result::Result<(), QueryError> {
        if self.is_cancelled() {
            return Err(QueryError::cancelled(format!("query {} was cancelled", self.id)));
        }
        if self.is_timed_out() {
            return Err(QueryError::timeout(format!(
                "query {} exceeded its deadline after {:?}",
                self.id,
                self.elapsed()
            )));
        }
        Ok(())
    }

    /// Chunk metadata cache shared by every reader of the query
    pub fn metadata_cache(&self) -> &Arc<ChunkMetadataCache> {
        &self.metadata
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels a running query
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

// ============================================================================
// Resource manager
// ============================================================================

/// Hands out data sources and tracks the files each query holds
pub struct QueryResourceManager {
    storage: Arc<dyn StorageEngine>,
    registry: Mutex<HashMap<u64, Vec<Arc<TsFileResource>>>>,
}

impl QueryResourceManager {
    /// Wrap a storage engine
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            storage,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying storage engine
    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Open the data source of `path` on behalf of query `ctx`
    ///
    /// Every returned file is acquired and registered under the query id
    /// until [`end_query`](Self::end_query).
    pub fn query_data_source(
        &self,
        ctx: &QueryContext,
        path: &SeriesPath,
        time_filter: Option<&TimeFilter>,
    ) -> Result<QueryDataSource> {
        let source = self.storage.query_data_source(path, time_filter)?;
        let mut registry = self.registry.lock();
        let held = registry.entry(ctx.id()).or_default();
        for file in source.files() {
            file.acquire();
            held.push(Arc::clone(file));
        }
        Ok(source)
    }

    /// Release every file held by `query_id`, returning how many handles were released
    ///
    /// Calling it again for the same id releases nothing.
    pub fn end_query(&self, query_id: u64) -> usize {
        let Some(files) = self.registry.lock().remove(&query_id) else {
            return 0;
        };
        for file in &files {
            file.release();
        }
        debug!(query_id, released = files.len(), "Released query resources");
        files.len()
    }

    /// Number of queries currently holding resources
    pub fn open_queries(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of file handles held by `query_id`
    pub fn held_by(&self, query_id: u64) -> usize {
        self.registry.lock().get(&query_id).map_or(0, Vec::len)
    }
}

/// Releases a query's resources on drop
pub struct QueryGuard<'a> {
    resources: &'a QueryResourceManager,
    query_id: u64,
}

impl<'a> QueryGuard<'a> {
    /// Start tracking query `query_id`
    pub fn new(resources: &'a QueryResourceManager, query_id: u64) -> Self {
        Self {
            resources,
            query_id,
        }
    }
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.resources.end_query(self.query_id);
    }
}
