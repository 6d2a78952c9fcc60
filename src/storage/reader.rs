//! Statistics-bearing series readers
//!
//! [`AggregateReader`] is the cursor contract the aggregation driver walks:
//! a forward-only file → chunk → page hierarchy where every level can be
//! answered from its statistics or opened one level down.
//!
//! ```text
//! has_next_file ──► can_use_current_file_statistics? ──yes──► current_file_statistics + skip_current_file
//!                        │ no
//!                        ▼
//!                   has_next_chunk ──► can_use_current_chunk_statistics? ──yes──► ... skip_current_chunk
//!                                            │ no
//!                                            ▼
//!                                       has_next_page ──► can_use_current_page_statistics? ──yes──► ... skip_current_page
//!                                                                │ no
//!                                                                ▼
//!                                                            next_page (decode)
//! ```
//!
//! Calling `has_next_chunk` opens the current file and `has_next_page` opens
//! the current chunk; an opened level cannot be answered from statistics
//! any more. Ranges that cannot intersect the time filter are dropped
//! without being surfaced.

use crate::error::{Error, Result, StorageError};
use crate::filter::TimeFilter;
use crate::path::SeriesPath;
use crate::statistics::Statistics;
use crate::storage::source::QueryDataSource;
use crate::storage::tsfile::{Chunk, Page, PageData, TsFileResource};
use crate::types::DataType;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Three-level cursor with statistics short-circuits
pub trait AggregateReader {
    /// Whether another file remains
    fn has_next_file(&mut self) -> Result<bool>;
    /// Whether the current file's statistics answer the query exactly
    fn can_use_current_file_statistics(&self) -> Result<bool>;
    /// Statistics of the current file for this series
    fn current_file_statistics(&self) -> Result<&Statistics>;
    /// Drop the current file and everything under it
    fn skip_current_file(&mut self);

    /// Whether another chunk remains in the opened file
    fn has_next_chunk(&mut self) -> Result<bool>;
    /// Whether the current chunk's statistics answer the query exactly
    fn can_use_current_chunk_statistics(&self) -> Result<bool>;
    /// Statistics of the current chunk
    fn current_chunk_statistics(&self) -> Result<&Statistics>;
    /// Drop the current chunk and its pages
    fn skip_current_chunk(&mut self);

    /// Whether another page remains in the opened chunk
    fn has_next_page(&mut self) -> Result<bool>;
    /// Whether the current page's statistics answer the query exactly
    fn can_use_current_page_statistics(&self) -> Result<bool>;
    /// Statistics of the current page
    fn current_page_statistics(&self) -> Result<&Statistics>;
    /// Drop the current page
    fn skip_current_page(&mut self);
    /// Decode the current page, keeping points accepted by the time filter, and advance
    fn next_page(&mut self) -> Result<PageData>;
}

/// Reader behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Allow answering from statistics; when off every page is decoded
    pub use_statistics: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            use_statistics: true,
        }
    }
}

// ============================================================================
// Chunk metadata cache
// ============================================================================

#[derive(Debug, Default)]
struct DeviceChunks {
    loaded: HashSet<String>,
    chunks: HashMap<String, Vec<Arc<Chunk>>>,
}

/// Per-query cache of chunk metadata, loaded per (file, device) for all
/// sibling measurements at once
#[derive(Debug, Default)]
pub struct ChunkMetadataCache {
    entries: RwLock<HashMap<(u64, String), Arc<DeviceChunks>>>,
    loads: AtomicUsize,
}

impl ChunkMetadataCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks of `path` in `file`, loading the device's `measurements` on a miss
    pub fn chunks(
        &self,
        file: &TsFileResource,
        path: &SeriesPath,
        measurements: &HashSet<String>,
    ) -> Vec<Arc<Chunk>> {
        let key = (file.id(), path.device());
        let mut wanted = measurements.clone();
        wanted.insert(path.measurement().to_string());
        if let Some(cached) = self.entries.read().get(&key) {
            if cached.loaded.contains(path.measurement()) {
                return cached.chunks.get(path.measurement()).cloned().unwrap_or_default();
            }
            wanted.extend(cached.loaded.iter().cloned());
        }
        let chunks = file.device_chunks(&key.1, &wanted);
        self.loads.fetch_add(1, Ordering::Relaxed);
        let result = chunks.get(path.measurement()).cloned().unwrap_or_default();
        self.entries.write().insert(
            key,
            Arc::new(DeviceChunks {
                loaded: wanted,
                chunks,
            }),
        );
        result
    }

    /// Number of metadata loads performed (cache misses)
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Series aggregate reader
// ============================================================================

/// [`AggregateReader`] over a [`QueryDataSource`]
pub struct SeriesAggregateReader {
    path: SeriesPath,
    measurements: HashSet<String>,
    data_type: DataType,
    time_filter: Option<TimeFilter>,
    options: ReaderOptions,
    cache: Arc<ChunkMetadataCache>,

    files: VecDeque<Arc<TsFileResource>>,
    current_file: Option<Arc<TsFileResource>>,
    chunks: VecDeque<Arc<Chunk>>,
    current_chunk: Option<Arc<Chunk>>,
    pages: VecDeque<Arc<Page>>,
    current_page: Option<Arc<Page>>,
}

impl SeriesAggregateReader {
    /// Create a reader for `path`
    ///
    /// `measurements` are the sibling measurements of the same device used by
    /// the query; their chunk metadata is loaded together.
    pub fn new(
        path: SeriesPath,
        measurements: HashSet<String>,
        data_type: DataType,
        source: QueryDataSource,
        time_filter: Option<TimeFilter>,
        options: ReaderOptions,
        cache: Arc<ChunkMetadataCache>,
    ) -> Self {
        let mut measurements = measurements;
        measurements.insert(path.measurement().to_string());
        Self {
            path,
            measurements,
            data_type,
            time_filter,
            options,
            cache,
            files: source.files().iter().cloned().collect(),
            current_file: None,
            chunks: VecDeque::new(),
            current_chunk: None,
            pages: VecDeque::new(),
            current_page: None,
        }
    }

    /// Series this reader scans
    pub fn path(&self) -> &SeriesPath {
        &self.path
    }

    /// Effective time filter
    pub fn time_filter(&self) -> Option<&TimeFilter> {
        self.time_filter.as_ref()
    }

    fn intersects(&self, stats: &Statistics) -> bool {
        self.time_filter
            .map_or(true, |f| f.intersects(&stats.time_range()))
    }

    fn covered(&self, stats: &Statistics) -> bool {
        self.options.use_statistics
            && self
                .time_filter
                .map_or(true, |f| f.contains_range(&stats.time_range()))
    }

    fn check_type(&self, data_type: DataType) -> Result<()> {
        if data_type != self.data_type {
            return Err(StorageError::TypeMismatch {
                path: self.path.full_path(),
                declared: self.data_type.to_string(),
                stored: data_type.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn unpack_file(&mut self, file: &TsFileResource) -> Result<()> {
        for chunk in self.cache.chunks(file, &self.path, &self.measurements) {
            self.check_type(chunk.data_type())?;
            self.chunks.push_back(chunk);
        }
        Ok(())
    }

    fn unpack_chunk(&mut self, chunk: &Chunk) {
        self.pages.extend(chunk.pages().iter().cloned());
    }
}

fn missing(level: &str) -> Error {
    Error::consistency(format!("no current {} on the cursor", level))
}

impl AggregateReader for SeriesAggregateReader {
    fn has_next_file(&mut self) -> Result<bool> {
        if self.current_chunk.is_some()
            || !self.chunks.is_empty()
            || self.current_page.is_some()
            || !self.pages.is_empty()
        {
            return Err(Error::consistency(
                "cached chunks and pages must be consumed before the next file",
            ));
        }
        if self.current_file.is_some() {
            return Ok(true);
        }
        while let Some(file) = self.files.pop_front() {
            let keep = match file.series_statistics(&self.path) {
                Some(stats) => {
                    self.check_type(stats.data_type)?;
                    self.intersects(stats)
                }
                None => false,
            };
            if keep {
                self.current_file = Some(file);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn can_use_current_file_statistics(&self) -> Result<bool> {
        let file = self.current_file.as_ref().ok_or_else(|| missing("file"))?;
        Ok(file.is_sealed() && self.covered(self.current_file_statistics()?))
    }

    fn current_file_statistics(&self) -> Result<&Statistics> {
        self.current_file
            .as_ref()
            .and_then(|f| f.series_statistics(&self.path))
            .ok_or_else(|| missing("file"))
    }

    fn skip_current_file(&mut self) {
        self.current_file = None;
    }

    fn has_next_chunk(&mut self) -> Result<bool> {
        if self.current_page.is_some() || !self.pages.is_empty() {
            return Err(Error::consistency(
                "cached pages must be consumed before the next chunk",
            ));
        }
        if self.current_chunk.is_some() {
            return Ok(true);
        }
        if self.chunks.is_empty() {
            if let Some(file) = self.current_file.take() {
                self.unpack_file(&file)?;
            }
        }
        while let Some(chunk) = self.chunks.pop_front() {
            if self.intersects(chunk.statistics()) {
                self.current_chunk = Some(chunk);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn can_use_current_chunk_statistics(&self) -> Result<bool> {
        Ok(self.covered(self.current_chunk_statistics()?))
    }

    fn current_chunk_statistics(&self) -> Result<&Statistics> {
        self.current_chunk
            .as_ref()
            .map(|c| c.statistics())
            .ok_or_else(|| missing("chunk"))
    }

    fn skip_current_chunk(&mut self) {
        self.current_chunk = None;
    }

    fn has_next_page(&mut self) -> Result<bool> {
        if self.current_page.is_some() {
            return Ok(true);
        }
        if self.pages.is_empty() {
            if let Some(chunk) = self.current_chunk.take() {
                self.unpack_chunk(&chunk);
            }
        }
        while let Some(page) = self.pages.pop_front() {
            if self.intersects(page.statistics()) {
                self.current_page = Some(page);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn can_use_current_page_statistics(&self) -> Result<bool> {
        Ok(self.covered(self.current_page_statistics()?))
    }

    fn current_page_statistics(&self) -> Result<&Statistics> {
        self.current_page
            .as_ref()
            .map(|p| p.statistics())
            .ok_or_else(|| missing("page"))
    }

    fn skip_current_page(&mut self) {
        self.current_page = None;
    }

    fn next_page(&mut self) -> Result<PageData> {
        let page = self.current_page.take().ok_or_else(|| missing("page"))?;
        Ok(page.decode(self.time_filter.as_ref()))
    }
}

/// Pull the next decoded page, opening files and chunks as needed
///
/// Files, chunks and pages that end before `from` are skipped using their
/// statistics. Returns `None` once the reader is exhausted.
pub fn next_page_from<R: AggregateReader + ?Sized>(
    reader: &mut R,
    from: Option<i64>,
) -> Result<Option<PageData>> {
    let before = |stats: &Statistics| from.map_or(false, |t| stats.end_time < t);
    loop {
        if reader.has_next_page()? {
            if before(reader.current_page_statistics()?) {
                reader.skip_current_page();
                continue;
            }
            return reader.next_page().map(Some);
        }
        if reader.has_next_chunk()? {
            if before(reader.current_chunk_statistics()?) {
                reader.skip_current_chunk();
            }
            continue;
        }
        if reader.has_next_file()? {
            if before(reader.current_file_statistics()?) {
                reader.skip_current_file();
            }
            continue;
        }
        return Ok(None);
    }
}
