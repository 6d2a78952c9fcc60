//! In-memory columnar file model
//!
//! Data is organised in three nested levels, each carrying its own
//! [`Statistics`]:
//!
//! ```text
//! TsFileResource ─┬─ device "root.sg.d1" ─┬─ measurement "s1" ─┬─ Chunk ─┬─ Page
//!                 │                       │                    │         └─ Page
//!                 │                       │                    └─ Chunk ─── Page
//!                 │                       └─ measurement "s2" ── ...
//!                 └─ device "root.sg.d2" ── ...
//! ```
//!
//! Pages hold points in non-decreasing time order; pages inside a chunk and
//! chunks inside a file follow each other in time. Constructors validate
//! this; `with_statistics` constructors accept precomputed (possibly
//! untrusted) statistics so corrupted metadata can be represented.

use crate::error::{Result, StorageError};
use crate::filter::TimeFilter;
use crate::path::SeriesPath;
use crate::statistics::{merge_all, Statistics};
use crate::types::{DataType, TimeValuePair, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Decoded page data
// ============================================================================

/// Points decoded from one page, in columnar form
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageData {
    /// Timestamps in non-decreasing order
    pub timestamps: Vec<Timestamp>,
    /// Values aligned with `timestamps`
    pub values: Vec<Value>,
}

impl PageData {
    /// Number of points
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the page decoded to nothing
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Iterate `(timestamp, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, &Value)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter())
    }
}

impl FromIterator<TimeValuePair> for PageData {
    fn from_iter<I: IntoIterator<Item = TimeValuePair>>(iter: I) -> Self {
        let mut data = PageData::default();
        for p in iter {
            data.timestamps.push(p.timestamp);
            data.values.push(p.value);
        }
        data
    }
}

// ============================================================================
// Page / Chunk
// ============================================================================

/// Smallest decodable unit
#[derive(Debug, Clone)]
pub struct Page {
    statistics: Statistics,
    points: Vec<TimeValuePair>,
}

impl Page {
    /// Build a page, computing its statistics
    pub fn new(data_type: DataType, points: Vec<TimeValuePair>) -> Result<Self> {
        check_points(data_type, &points)?;
        let statistics = Statistics::from_points(data_type, &points)
            .ok_or_else(|| StorageError::CorruptedMetadata("empty page".to_string()))?;
        Ok(Self { statistics, points })
    }

    /// Build a page from stored statistics without verifying them
    pub fn with_statistics(statistics: Statistics, points: Vec<TimeValuePair>) -> Self {
        Self { statistics, points }
    }

    /// Page statistics
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Decode the points accepted by `filter`
    pub fn decode(&self, filter: Option<&TimeFilter>) -> PageData {
        self.points
            .iter()
            .filter(|p| filter.map_or(true, |f| f.satisfy(p.timestamp)))
            .cloned()
            .collect()
    }
}

/// Run of pages for one measurement
#[derive(Debug, Clone)]
pub struct Chunk {
    measurement: String,
    data_type: DataType,
    statistics: Statistics,
    pages: Vec<Arc<Page>>,
}

impl Chunk {
    /// Build a chunk from pages, merging their statistics
    pub fn new(measurement: &str, data_type: DataType, pages: Vec<Page>) -> Result<Self> {
        let pages: Vec<Arc<Page>> = pages.into_iter().map(Arc::new).collect();
        for pair in pages.windows(2) {
            if pair[1].statistics.start_time < pair[0].statistics.end_time {
                return Err(StorageError::CorruptedMetadata(format!(
                    "pages of chunk {} overlap in time",
                    measurement
                ))
                .into());
            }
        }
        let statistics = merge_all(pages.iter().map(|p| &p.statistics)).ok_or_else(|| {
            StorageError::CorruptedMetadata(format!("chunk {} has no pages", measurement))
        })?;
        Ok(Self {
            measurement: measurement.to_string(),
            data_type,
            statistics,
            pages,
        })
    }

    /// Build a chunk from stored statistics without verifying them
    pub fn with_statistics(
        measurement: &str,
        data_type: DataType,
        statistics: Statistics,
        pages: Vec<Page>,
    ) -> Self {
        Self {
            measurement: measurement.to_string(),
            data_type,
            statistics,
            pages: pages.into_iter().map(Arc::new).collect(),
        }
    }

    /// Measurement name
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Stored value type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Chunk statistics
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Pages in time order
    pub fn pages(&self) -> &[Arc<Page>] {
        &self.pages
    }
}

fn check_points(data_type: DataType, points: &[TimeValuePair]) -> Result<()> {
    for p in points {
        if p.value.data_type() != data_type {
            return Err(StorageError::CorruptedMetadata(format!(
                "value {} at {} is not {}",
                p.value, p.timestamp, data_type
            ))
            .into());
        }
    }
    if points.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        return Err(StorageError::CorruptedMetadata("page points out of order".to_string()).into());
    }
    Ok(())
}

// ============================================================================
// File
// ============================================================================

/// Chunks and file-level statistics of one series inside a file
#[derive(Debug, Clone)]
pub struct SeriesChunks {
    /// Statistics over all chunks of the series in this file
    pub statistics: Statistics,
    /// Chunks in time order
    pub chunks: Vec<Arc<Chunk>>,
}

/// One data file holding chunks for any number of devices
#[derive(Debug)]
pub struct TsFileResource {
    id: u64,
    sealed: bool,
    devices: HashMap<String, BTreeMap<String, SeriesChunks>>,
    open_handles: AtomicUsize,
}

impl TsFileResource {
    /// Start building a file
    pub fn builder(id: u64) -> TsFileBuilder {
        TsFileBuilder {
            id,
            sealed: true,
            devices: HashMap::new(),
        }
    }

    /// File identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sealed files have final statistics; unsealed ones are still being written
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// File-level statistics of a series, `None` if the file has no data for it
    pub fn series_statistics(&self, path: &SeriesPath) -> Option<&Statistics> {
        self.series(path).map(|s| &s.statistics)
    }

    /// Chunks of a series, empty if the file has no data for it
    pub fn chunks(&self, path: &SeriesPath) -> &[Arc<Chunk>] {
        self.series(path).map_or(&[], |s| s.chunks.as_slice())
    }

    fn series(&self, path: &SeriesPath) -> Option<&SeriesChunks> {
        self.devices
            .get(&path.device())
            .and_then(|m| m.get(path.measurement()))
    }

    /// Chunk metadata of a device restricted to a measurement set
    pub fn device_chunks(
        &self,
        device: &str,
        measurements: &HashSet<String>,
    ) -> HashMap<String, Vec<Arc<Chunk>>> {
        self.devices
            .get(device)
            .map(|m| {
                m.iter()
                    .filter(|(name, _)| measurements.contains(*name))
                    .map(|(name, s)| (name.clone(), s.chunks.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record that a query holds this file open
    pub fn acquire(&self) {
        self.open_handles.fetch_add(1, Ordering::AcqRel);
    }

    /// Release a handle taken with [`acquire`](Self::acquire)
    pub fn release(&self) {
        let _ = self
            .open_handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of queries currently holding the file
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }
}

/// Builder for [`TsFileResource`]
#[derive(Debug)]
pub struct TsFileBuilder {
    id: u64,
    sealed: bool,
    devices: HashMap<String, BTreeMap<String, SeriesChunks>>,
}

impl TsFileBuilder {
    /// Mark the file as unsealed (statistics not final)
    pub fn unsealed(mut self) -> Self {
        self.sealed = false;
        self
    }

    /// Append a chunk to the series at `path`
    pub fn chunk(mut self, path: &SeriesPath, chunk: Chunk) -> Result<Self> {
        if chunk.measurement() != path.measurement() {
            return Err(StorageError::CorruptedMetadata(format!(
                "chunk for {} added under {}",
                chunk.measurement(),
                path
            ))
            .into());
        }
        let chunk = Arc::new(chunk);
        let measurements = self.devices.entry(path.device()).or_default();
        match measurements.get_mut(path.measurement()) {
            Some(series) => {
                if chunk.statistics().start_time < series.statistics.end_time {
                    return Err(StorageError::CorruptedMetadata(format!(
                        "chunks of {} overlap in time",
                        path
                    ))
                    .into());
                }
                series.statistics.merge(chunk.statistics());
                series.chunks.push(chunk);
            }
            None => {
                measurements.insert(
                    path.measurement().to_string(),
                    SeriesChunks {
                        statistics: chunk.statistics().clone(),
                        chunks: vec![chunk],
                    },
                );
            }
        }
        Ok(self)
    }

    /// Set the file-level statistics of a series without verifying them
    pub fn series_statistics(mut self, path: &SeriesPath, statistics: Statistics) -> Self {
        if let Some(series) = self
            .devices
            .get_mut(&path.device())
            .and_then(|m| m.get_mut(path.measurement()))
        {
            series.statistics = statistics;
        }
        self
    }

    /// Finish the file
    pub fn build(self) -> TsFileResource {
        TsFileResource {
            id: self.id,
            sealed: self.sealed,
            devices: self.devices,
            open_handles: AtomicUsize::new(0),
        }
    }
}

// ============================================================================
// Layout helper
// ============================================================================

/// How a point sequence is cut into pages, chunks and files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Points per page
    pub points_per_page: usize,
    /// Pages per chunk
    pub pages_per_chunk: usize,
    /// Chunks per file
    pub chunks_per_file: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            points_per_page: 1024,
            pages_per_chunk: 8,
            chunks_per_file: 4,
        }
    }
}

impl Layout {
    /// Create a layout; zero sizes are raised to one
    pub fn new(points_per_page: usize, pages_per_chunk: usize, chunks_per_file: usize) -> Self {
        Self {
            points_per_page: points_per_page.max(1),
            pages_per_chunk: pages_per_chunk.max(1),
            chunks_per_file: chunks_per_file.max(1),
        }
    }

    /// Split time-ordered points of one series into sealed files
    ///
    /// File ids are assigned from `first_id` upward.
    pub fn split(
        &self,
        path: &SeriesPath,
        data_type: DataType,
        points: &[TimeValuePair],
        first_id: u64,
    ) -> Result<Vec<TsFileResource>> {
        let points_per_chunk = self.points_per_page * self.pages_per_chunk;
        let points_per_file = points_per_chunk * self.chunks_per_file;
        let mut files = Vec::new();
        for (i, file_points) in points.chunks(points_per_file).enumerate() {
            let mut builder = TsFileResource::builder(first_id + i as u64);
            for chunk_points in file_points.chunks(points_per_chunk) {
                let pages = chunk_points
                    .chunks(self.points_per_page)
                    .map(|p| Page::new(data_type, p.to_vec()))
                    .collect::<Result<Vec<_>>>()?;
                builder = builder.chunk(path, Chunk::new(path.measurement(), data_type, pages)?)?;
            }
            files.push(builder.build());
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(range: std::ops::Range<i64>) -> Vec<TimeValuePair> {
        range.map(|i| TimeValuePair::new(i, Value::Int64(i))).collect()
    }

    #[test]
    fn test_layout_split() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let files = Layout::new(10, 2, 2)
            .split(&path, DataType::Int64, &points(0..100), 1)
            .unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].chunks(&path).len(), 2);
        assert_eq!(files[0].chunks(&path)[0].pages().len(), 2);
        let stats = files[2].series_statistics(&path).unwrap();
        assert_eq!(stats.start_time, 80);
        assert_eq!(stats.count, 20);
    }

    #[test]
    fn test_page_rejects_unordered_points() {
        let mut pts = points(0..5);
        pts.swap(1, 3);
        assert!(Page::new(DataType::Int64, pts).is_err());
    }

    #[test]
    fn test_page_rejects_wrong_type() {
        let pts = vec![TimeValuePair::new(1, Value::Double(1.0))];
        assert!(Page::new(DataType::Int64, pts).is_err());
    }

    #[test]
    fn test_decode_with_filter() {
        let page = Page::new(DataType::Int64, points(0..10)).unwrap();
        let data = page.decode(Some(&TimeFilter::between(3, 5)));
        assert_eq!(data.timestamps, vec![3, 4, 5]);
        assert_eq!(page.decode(None).len(), 10);
    }

    #[test]
    fn test_device_chunks_filters_measurements() {
        let s1 = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let s2 = SeriesPath::parse("root.sg.d1.s2").unwrap();
        let page = |m| Page::new(DataType::Int64, points(m)).unwrap();
        let file = TsFileResource::builder(1)
            .chunk(&s1, Chunk::new("s1", DataType::Int64, vec![page(0..5)]).unwrap())
            .unwrap()
            .chunk(&s2, Chunk::new("s2", DataType::Int64, vec![page(0..5)]).unwrap())
            .unwrap()
            .build();
        let wanted: HashSet<String> = ["s1".to_string()].into_iter().collect();
        let chunks = file.device_chunks("root.sg.d1", &wanted);
        assert_eq!(chunks.len(), 1);
        assert!(chunks.contains_key("s1"));
    }

    #[test]
    fn test_handles() {
        let file = TsFileResource::builder(7).build();
        file.acquire();
        file.acquire();
        file.release();
        assert_eq!(file.open_handles(), 1);
        file.release();
        file.release();
        assert_eq!(file.open_handles(), 0);
    }
}
