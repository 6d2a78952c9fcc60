//! Single-series aggregation driver
//!
//! Walks one series reader through file → chunk → page. At each level the
//! unit's statistics are used whenever the reader says they answer the
//! query; otherwise the driver descends one level, down to decoding pages.
//! The walk stops as soon as every requested function is final.
//!
//! The driver also enforces the reader contract it relies on: chunks lie
//! inside their file's range, pages inside their chunk's range, and the
//! units it applies never go back in time. A violation aborts the query
//! with [`Error::Consistency`].

use crate::aggregation::{AggregateAccumulator, AggregateFunction, AggregateResult};
use crate::error::{Error, Result};
use crate::filter::TimeFilter;
use crate::metrics;
use crate::path::SeriesPath;
use crate::query::context::{QueryContext, QueryResourceManager};
use crate::statistics::Statistics;
use crate::storage::reader::{AggregateReader, ReaderOptions, SeriesAggregateReader};
use crate::storage::source::TsFileFilter;
use crate::storage::tsfile::PageData;
use crate::types::{DataType, TimeRange, Timestamp};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Work done by one series scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Files answered from statistics
    pub files_from_statistics: usize,
    /// Chunks answered from statistics
    pub chunks_from_statistics: usize,
    /// Pages answered from statistics
    pub pages_from_statistics: usize,
    /// Pages decoded
    pub pages_decoded: usize,
    /// Points decoded
    pub points_decoded: usize,
    /// Whether the scan stopped because every function was final
    pub early_exit: bool,
}

impl ScanStats {
    /// Add another scan's counters
    pub fn merge(&mut self, other: &ScanStats) {
        self.files_from_statistics += other.files_from_statistics;
        self.chunks_from_statistics += other.chunks_from_statistics;
        self.pages_from_statistics += other.pages_from_statistics;
        self.pages_decoded += other.pages_decoded;
        self.points_decoded += other.points_decoded;
        self.early_exit |= other.early_exit;
    }
}

/// What to aggregate for one series
#[derive(Debug, Clone, Copy)]
pub struct SeriesRequest<'a> {
    /// Series to scan
    pub path: &'a SeriesPath,
    /// Sibling measurements of the same device used by the query
    pub measurements: &'a HashSet<String>,
    /// Declared type of the series
    pub data_type: DataType,
    /// Functions to compute, one result each
    pub functions: &'a [AggregateFunction],
}

/// How to scan
#[derive(Clone, Copy, Default)]
pub struct ScanOptions<'a> {
    /// Time window of the query
    pub time_filter: Option<TimeFilter>,
    /// Optional file-selection predicate
    pub file_filter: Option<&'a dyn TsFileFilter>,
    /// Reader switches
    pub reader: ReaderOptions,
}

/// Aggregate one series, returning one result per requested function
pub fn aggregate_one_series(
    resources: &QueryResourceManager,
    ctx: &QueryContext,
    series: &SeriesRequest<'_>,
    options: &ScanOptions<'_>,
) -> Result<(Vec<AggregateResult>, ScanStats)> {
    let mut accumulator = AggregateAccumulator::new(series.functions, series.data_type)?;

    let mut source =
        resources.query_data_source(ctx, series.path, options.time_filter.as_ref())?;
    if let Some(file_filter) = options.file_filter {
        source.filter_files(file_filter);
    }
    let time_filter = source.update_filter_using_ttl(options.time_filter, ctx.query_time());
    if time_filter != options.time_filter {
        debug!(path = %series.path, ttl = ?source.data_ttl(), filter = ?time_filter, "Narrowed time filter by TTL");
    }

    let mut reader = SeriesAggregateReader::new(
        series.path.clone(),
        series.measurements.clone(),
        series.data_type,
        source,
        time_filter,
        options.reader,
        ctx.metadata_cache().clone(),
    );
    let stats = aggregate_from_reader(&mut reader, &mut accumulator, ctx)?;
    metrics::record_scan(&stats);
    debug!(
        path = %series.path,
        functions = series.functions.len(),
        files_from_statistics = stats.files_from_statistics,
        chunks_from_statistics = stats.chunks_from_statistics,
        pages_from_statistics = stats.pages_from_statistics,
        pages_decoded = stats.pages_decoded,
        early_exit = stats.early_exit,
        "Scanned series"
    );
    Ok((accumulator.into_results(), stats))
}

/// Drive `reader` into `accumulator` until it is exhausted or every slot is final
pub fn aggregate_from_reader<R: AggregateReader + ?Sized>(
    reader: &mut R,
    accumulator: &mut AggregateAccumulator,
    ctx: &QueryContext,
) -> Result<ScanStats> {
    let mut stats = ScanStats::default();
    let mut order = TimeOrder::default();

    if accumulator.is_saturated() {
        return Ok(stats);
    }

    while reader.has_next_file()? {
        ctx.check()?;
        let file_range = reader.current_file_statistics()?.time_range();

        if reader.can_use_current_file_statistics()? {
            let file_stats = reader.current_file_statistics()?;
            order.apply(file_stats.start_time, file_stats.end_time, "file")?;
            stats.files_from_statistics += 1;
            let remaining = accumulator.update_from_statistics(file_stats);
            reader.skip_current_file();
            if remaining == 0 {
                return Ok(exit_early(stats));
            }
            continue;
        }

        while reader.has_next_chunk()? {
            ctx.check()?;
            let chunk_range = reader.current_chunk_statistics()?.time_range();
            check_nested(&file_range, &chunk_range, "chunk", "file")?;

            if reader.can_use_current_chunk_statistics()? {
                let chunk_stats = reader.current_chunk_statistics()?;
                order.apply(chunk_stats.start_time, chunk_stats.end_time, "chunk")?;
                stats.chunks_from_statistics += 1;
                let remaining = accumulator.update_from_statistics(chunk_stats);
                reader.skip_current_chunk();
                if remaining == 0 {
                    return Ok(exit_early(stats));
                }
                continue;
            }

            while reader.has_next_page()? {
                let page_stats: &Statistics = reader.current_page_statistics()?;
                check_nested(&chunk_range, &page_stats.time_range(), "page", "chunk")?;

                let remaining = if reader.can_use_current_page_statistics()? {
                    let page_stats = reader.current_page_statistics()?;
                    order.apply(page_stats.start_time, page_stats.end_time, "page")?;
                    stats.pages_from_statistics += 1;
                    let remaining = accumulator.update_from_statistics(page_stats);
                    reader.skip_current_page();
                    remaining
                } else {
                    let data = reader.next_page()?;
                    order.apply_page(&data)?;
                    stats.pages_decoded += 1;
                    stats.points_decoded += data.len();
                    trace!(points = data.len(), "Decoded page");
                    accumulator.update_from_page(&data)
                };
                if remaining == 0 {
                    return Ok(exit_early(stats));
                }
            }
        }
    }
    Ok(stats)
}

fn exit_early(mut stats: ScanStats) -> ScanStats {
    trace!("All functions final, stopping scan");
    stats.early_exit = true;
    stats
}

fn check_nested(outer: &TimeRange, inner: &TimeRange, inner_level: &str, outer_level: &str) -> Result<()> {
    if !outer.encloses(inner) {
        return Err(Error::consistency(format!(
            "{} range [{}, {}] escapes its {} range [{}, {}]",
            inner_level, inner.start, inner.end, outer_level, outer.start, outer.end
        )));
    }
    Ok(())
}

/// Watermark of the latest time applied to the accumulator
#[derive(Debug, Default)]
struct TimeOrder {
    watermark: Option<Timestamp>,
}

impl TimeOrder {
    fn apply(&mut self, start: Timestamp, end: Timestamp, level: &str) -> Result<()> {
        if let Some(mark) = self.watermark {
            if start < mark {
                return Err(Error::consistency(format!(
                    "{} starting at {} applied after data up to {}",
                    level, start, mark
                )));
            }
        }
        self.watermark = Some(end);
        Ok(())
    }

    fn apply_page(&mut self, page: &PageData) -> Result<()> {
        match (page.timestamps.first(), page.timestamps.last()) {
            (Some(&first), Some(&last)) => self.apply(first, last, "decoded page"),
            _ => Ok(()),
        }
    }
}
