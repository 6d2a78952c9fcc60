//! Point lookup by timestamp
//!
//! Used by the value-filtered path: once the timestamp generator has picked
//! the qualifying times, every aggregated series is probed at exactly those
//! times. Lookups must come in non-decreasing time order, which lets the
//! reader skip whole files, chunks and pages that end before the probe.

use crate::error::{Error, Result};
use crate::storage::reader::{next_page_from, SeriesAggregateReader};
use crate::storage::tsfile::PageData;
use crate::types::{Timestamp, Value};

/// Value lookup at ascending timestamps
pub trait ReaderByTimestamp {
    /// Value stored at exactly `timestamp`, `None` if the series has no point there
    fn value_at(&mut self, timestamp: Timestamp) -> Result<Option<Value>>;

    /// Values at a batch of ascending timestamps, aligned with the input
    fn values_at(&mut self, timestamps: &[Timestamp]) -> Result<Vec<Option<Value>>> {
        timestamps.iter().map(|&t| self.value_at(t)).collect()
    }
}

/// [`ReaderByTimestamp`] over a series reader
pub struct SeriesReaderByTimestamp {
    reader: SeriesAggregateReader,
    page: PageData,
    cursor: usize,
    last: Option<Timestamp>,
}

impl SeriesReaderByTimestamp {
    /// Wrap a series reader
    pub fn new(reader: SeriesAggregateReader) -> Self {
        Self {
            reader,
            page: PageData::default(),
            cursor: 0,
            last: None,
        }
    }
}

impl ReaderByTimestamp for SeriesReaderByTimestamp {
    fn value_at(&mut self, timestamp: Timestamp) -> Result<Option<Value>> {
        if self.last.map_or(false, |last| timestamp < last) {
            return Err(Error::consistency(format!(
                "timestamp {} requested after {} on {}",
                timestamp,
                self.last.unwrap_or_default(),
                self.reader.path()
            )));
        }
        self.last = Some(timestamp);

        loop {
            while let Some(&t) = self.page.timestamps.get(self.cursor) {
                if t < timestamp {
                    self.cursor += 1;
                    continue;
                }
                if t == timestamp {
                    return Ok(Some(self.page.values[self.cursor].clone()));
                }
                return Ok(None);
            }
            match next_page_from(&mut self.reader, Some(timestamp))? {
                Some(page) => {
                    self.page = page;
                    self.cursor = 0;
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::SeriesPath;
    use crate::storage::reader::{ChunkMetadataCache, ReaderOptions};
    use crate::storage::source::{MemoryStorage, StorageEngine};
    use crate::storage::tsfile::Layout;
    use crate::types::{DataType, TimeValuePair};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn even_series() -> SeriesReaderByTimestamp {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let points: Vec<TimeValuePair> = (0..50)
            .map(|i| TimeValuePair::new(i * 2, Value::Int64(i)))
            .collect();
        let storage = MemoryStorage::new();
        storage.add_files(
            Layout::new(4, 2, 2)
                .split(&path, DataType::Int64, &points, 1)
                .unwrap(),
        );
        let source = storage.query_data_source(&path, None).unwrap();
        SeriesReaderByTimestamp::new(SeriesAggregateReader::new(
            path,
            HashSet::new(),
            DataType::Int64,
            source,
            None,
            ReaderOptions::default(),
            Arc::new(ChunkMetadataCache::new()),
        ))
    }

    #[test]
    fn test_values_at() {
        let mut reader = even_series();
        let values = reader.values_at(&[0, 1, 2, 40, 41, 98, 99]).unwrap();
        assert_eq!(
            values,
            vec![
                Some(Value::Int64(0)),
                None,
                Some(Value::Int64(1)),
                Some(Value::Int64(20)),
                None,
                Some(Value::Int64(49)),
                None
            ]
        );
    }

    #[test]
    fn test_repeated_timestamp() {
        let mut reader = even_series();
        assert_eq!(reader.value_at(10).unwrap(), Some(Value::Int64(5)));
        assert_eq!(reader.value_at(10).unwrap(), Some(Value::Int64(5)));
    }

    #[test]
    fn test_descending_timestamps_rejected() {
        let mut reader = even_series();
        reader.value_at(10).unwrap();
        assert!(matches!(reader.value_at(4), Err(Error::Consistency(_))));
    }
}
