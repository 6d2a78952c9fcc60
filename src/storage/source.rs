//! Data sources: which files a query reads for a series
//!
//! The [`StorageEngine`] trait is the seam to the storage layer. Given a
//! series path and an optional time filter it returns a [`QueryDataSource`]:
//! the time-ordered files holding that series plus the time-to-live of the
//! series' storage group. [`MemoryStorage`] is the in-process implementation.

use crate::error::{Result, StorageError};
use crate::filter::TimeFilter;
use crate::path::SeriesPath;
use crate::storage::tsfile::TsFileResource;
use crate::types::Timestamp;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Storage layer as seen by the query engine
pub trait StorageEngine: Send + Sync {
    /// Files relevant to `path`, in time order
    fn query_data_source(
        &self,
        path: &SeriesPath,
        time_filter: Option<&TimeFilter>,
    ) -> Result<QueryDataSource>;
}

/// File-selection predicate applied on top of a data source
pub trait TsFileFilter: Send + Sync {
    /// Return true to drop `file` from the scan
    fn file_not_satisfy(&self, file: &TsFileResource) -> bool;
}

impl<F> TsFileFilter for F
where
    F: Fn(&TsFileResource) -> bool + Send + Sync,
{
    fn file_not_satisfy(&self, file: &TsFileResource) -> bool {
        self(file)
    }
}

/// Files to scan for one series
#[derive(Debug, Clone, Default)]
pub struct QueryDataSource {
    files: Vec<Arc<TsFileResource>>,
    data_ttl: Option<i64>,
}

impl QueryDataSource {
    /// Create a data source
    pub fn new(files: Vec<Arc<TsFileResource>>, data_ttl: Option<i64>) -> Self {
        Self { files, data_ttl }
    }

    /// Files in time order
    pub fn files(&self) -> &[Arc<TsFileResource>] {
        &self.files
    }

    /// Time-to-live in milliseconds, `None` for data that never expires
    pub fn data_ttl(&self) -> Option<i64> {
        self.data_ttl
    }

    /// Drop the files rejected by `filter`
    pub fn filter_files(&mut self, filter: &dyn TsFileFilter) {
        self.files.retain(|f| !filter.file_not_satisfy(f));
    }

    /// Narrow `filter` so that expired points (`t < now - ttl`) are excluded
    pub fn update_filter_using_ttl(
        &self,
        filter: Option<TimeFilter>,
        now: Timestamp,
    ) -> Option<TimeFilter> {
        let Some(ttl) = self.data_ttl else {
            return filter;
        };
        let ttl_filter = TimeFilter::gt_eq(now.saturating_sub(ttl));
        Some(match filter {
            Some(f) => f.and(&ttl_filter),
            None => ttl_filter,
        })
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// In-process storage engine over [`TsFileResource`]s
///
/// Keeps per-series open counters so callers can check how many times a
/// series was opened by a query.
#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<Vec<Arc<TsFileResource>>>,
    ttl: RwLock<HashMap<String, i64>>,
    default_ttl: Option<i64>,
    unavailable: RwLock<HashMap<String, String>>,
    opened: Mutex<HashMap<String, usize>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage applying `ttl_ms` to series without their own TTL
    pub fn with_default_ttl(ttl_ms: Option<i64>) -> Self {
        Self {
            default_ttl: ttl_ms,
            ..Self::default()
        }
    }

    /// Add a file
    pub fn add_file(&self, file: TsFileResource) -> Arc<TsFileResource> {
        let file = Arc::new(file);
        self.files.write().push(Arc::clone(&file));
        file
    }

    /// Add several files
    pub fn add_files(&self, files: impl IntoIterator<Item = TsFileResource>) {
        let mut guard = self.files.write();
        guard.extend(files.into_iter().map(Arc::new));
    }

    /// All files
    pub fn files(&self) -> Vec<Arc<TsFileResource>> {
        self.files.read().clone()
    }

    /// Set a TTL for every series under `prefix` (e.g. a storage group)
    pub fn set_ttl(&self, prefix: &str, ttl_ms: i64) {
        self.ttl.write().insert(prefix.to_string(), ttl_ms);
    }

    /// Make opening `path` fail with a storage error
    pub fn set_unavailable(&self, path: &SeriesPath, reason: &str) {
        self.unavailable
            .write()
            .insert(path.full_path(), reason.to_string());
    }

    /// Reject every further request
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// How many data sources were opened for `path`
    pub fn open_count(&self, path: &SeriesPath) -> usize {
        self.opened.lock().get(&path.full_path()).copied().unwrap_or(0)
    }

    fn ttl_for(&self, path: &SeriesPath) -> Option<i64> {
        let full = path.full_path();
        let ttl = self.ttl.read();
        ttl.iter()
            .filter(|(prefix, _)| {
                full == **prefix || full.starts_with(&format!("{}.", prefix))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, ttl)| *ttl)
            .or(self.default_ttl)
    }
}

impl StorageEngine for MemoryStorage {
    fn query_data_source(
        &self,
        path: &SeriesPath,
        time_filter: Option<&TimeFilter>,
    ) -> Result<QueryDataSource> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed.into());
        }
        if let Some(reason) = self.unavailable.read().get(&path.full_path()) {
            return Err(StorageError::Unavailable {
                path: path.full_path(),
                reason: reason.clone(),
            }
            .into());
        }
        *self.opened.lock().entry(path.full_path()).or_insert(0) += 1;

        let mut files: Vec<Arc<TsFileResource>> = self
            .files
            .read()
            .iter()
            .filter(|f| match f.series_statistics(path) {
                Some(stats) => time_filter.map_or(true, |tf| tf.intersects(&stats.time_range())),
                None => false,
            })
            .cloned()
            .collect();
        files.sort_by_key(|f| f.series_statistics(path).map_or(i64::MIN, |s| s.start_time));

        debug!(path = %path, files = files.len(), "Opened query data source");
        Ok(QueryDataSource::new(files, self.ttl_for(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::tsfile::Layout;
    use crate::types::{DataType, TimeValuePair, Value};

    fn storage_with_series(path: &SeriesPath) -> MemoryStorage {
        let points: Vec<TimeValuePair> = (0..100)
            .map(|i| TimeValuePair::new(i, Value::Int64(i)))
            .collect();
        let storage = MemoryStorage::new();
        storage.add_files(
            Layout::new(10, 2, 2)
                .split(path, DataType::Int64, &points, 1)
                .unwrap(),
        );
        storage
    }

    #[test]
    fn test_query_data_source_prunes_files() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let storage = storage_with_series(&path);
        let all = storage.query_data_source(&path, None).unwrap();
        assert_eq!(all.files().len(), 3);
        let some = storage
            .query_data_source(&path, Some(&TimeFilter::between(85, 90)))
            .unwrap();
        assert_eq!(some.files().len(), 1);
        assert_eq!(storage.open_count(&path), 2);
    }

    #[test]
    fn test_unknown_series_is_empty() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let storage = storage_with_series(&path);
        let other = SeriesPath::parse("root.sg.d9.s1").unwrap();
        assert!(storage.query_data_source(&other, None).unwrap().files().is_empty());
    }

    #[test]
    fn test_ttl_narrows_filter() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let storage = storage_with_series(&path);
        storage.set_ttl("root.sg", 50);
        let source = storage.query_data_source(&path, None).unwrap();
        assert_eq!(source.data_ttl(), Some(50));
        let narrowed = source.update_filter_using_ttl(Some(TimeFilter::lt(80)), 100).unwrap();
        assert_eq!(narrowed, TimeFilter::between(50, 79));
    }

    #[test]
    fn test_file_filter() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let storage = storage_with_series(&path);
        let mut source = storage.query_data_source(&path, None).unwrap();
        source.filter_files(&|f: &TsFileResource| f.id() == 2);
        assert_eq!(source.files().len(), 2);
    }

    #[test]
    fn test_failures() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let storage = storage_with_series(&path);
        storage.set_unavailable(&path, "disk offline");
        assert!(matches!(
            storage.query_data_source(&path, None),
            Err(Error::Storage(StorageError::Unavailable { .. }))
        ));
        storage.close();
        assert!(matches!(
            storage.query_data_source(&path, None),
            Err(Error::Storage(StorageError::Closed))
        ));
    }
}
