//! Aggregation executor
//!
//! Runs an [`AggregationPlan`] end to end:
//!
//! ```text
//! ┌─────────────────┐
//! │    Validate     │  functions, types, rollup, filter shape
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Group by series │  each distinct series is scanned once
//! └────────┬────────┘
//!          │
//!    ┌─────┴──────────────────────┐
//!    │ time filter / none         │ value filter
//! ┌──▼──────────────┐   ┌─────────▼─────────┐
//! │ Statistics scan │   │ Timestamp batches │
//! │ (rayon windows) │   │ + lookups by time │
//! └──┬──────────────┘   └─────────┬─────────┘
//!    └─────────────┬──────────────┘
//! ┌────────────────▼────────┐
//! │ Scatter + assemble      │  entry order, optional rollup
//! └─────────────────────────┘
//! ```
//!
//! Every file opened on behalf of the query is released when execution
//! returns, whether it succeeded or not.

use crate::aggregation::{AggregateAccumulator, AggregateFunction, AggregateResult};
use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::filter::{Expression, TimeFilter};
use crate::metrics;
use crate::path::SeriesPath;
use crate::query::context::{QueryContext, QueryGuard, QueryResourceManager};
use crate::query::plan::{AggregationPlan, FilterKind};
use crate::query::result::{assemble, AggregateDataSet};
use crate::query::scan::{aggregate_one_series, ScanOptions, ScanStats, SeriesRequest};
use crate::query::timegen::{leaf_reader, ServerTimeGenerator, TimestampGenerator};
use crate::storage::by_timestamp::{ReaderByTimestamp, SeriesReaderByTimestamp};
use crate::storage::reader::ReaderOptions;
use crate::storage::source::TsFileFilter;
use crate::types::DataType;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

// ============================================================================
// Series grouping
// ============================================================================

/// One distinct series of a plan and the entries it answers
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGroup {
    /// Series to scan
    pub path: SeriesPath,
    /// Declared type
    pub data_type: DataType,
    /// Distinct functions, in order of first appearance
    pub functions: Vec<AggregateFunction>,
    /// `(entry index, function index)` for every plan entry on this series
    pub targets: Vec<(usize, usize)>,
}

/// Group plan entries by series, in order of first appearance
///
/// A function requested twice on the same series is computed once and
/// copied to both entries.
pub fn group_by_series(plan: &AggregationPlan, functions: &[AggregateFunction]) -> Vec<SeriesGroup> {
    let mut groups: Vec<SeriesGroup> = Vec::new();
    let mut index: HashMap<&SeriesPath, usize> = HashMap::new();

    for (entry, ((path, function), data_type)) in plan
        .paths
        .iter()
        .zip(functions)
        .zip(&plan.data_types)
        .enumerate()
    {
        let slot = *index.entry(path).or_insert_with(|| {
            groups.push(SeriesGroup {
                path: path.clone(),
                data_type: *data_type,
                functions: Vec::new(),
                targets: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        let position = match group.functions.iter().position(|f| f == function) {
            Some(position) => position,
            None => {
                group.functions.push(*function);
                group.functions.len() - 1
            }
        };
        group.targets.push((entry, position));
    }
    groups
}

fn scatter(
    groups: &[SeriesGroup],
    outputs: Vec<Vec<AggregateResult>>,
    entries: usize,
) -> Result<Vec<AggregateResult>> {
    let mut results: Vec<Option<AggregateResult>> = vec![None; entries];
    for (group, output) in groups.iter().zip(outputs) {
        for &(entry, position) in &group.targets {
            let result = output.get(position).cloned().ok_or_else(|| {
                Error::consistency(format!("no result {} for {}", position, group.path))
            })?;
            results[entry] = Some(result);
        }
    }
    results
        .into_iter()
        .enumerate()
        .map(|(entry, r)| r.ok_or_else(|| Error::consistency(format!("entry {} was not computed", entry))))
        .collect()
}

// ============================================================================
// Execution statistics
// ============================================================================

/// Counters accumulated over every query run by one executor
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    /// Queries executed, successful or not
    pub total_queries: u64,
    /// Queries that returned an error
    pub failed_queries: u64,
    /// Wall time spent executing
    pub total_execution_time: Duration,
    /// Distinct series scanned
    pub series_scanned: u64,
    /// Timestamp batches pulled on the value-filtered path
    pub value_filter_batches: u64,
    /// Timestamps produced by the generator
    pub timestamps_generated: u64,
    /// Pruning counters merged over every statistics scan
    pub scan: ScanStats,
}

impl ExecutionStats {
    /// Average latency per query
    pub fn avg_query_latency(&self) -> Duration {
        if self.total_queries == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.total_queries.min(u32::MAX as u64) as u32
        }
    }

    /// Share of decoded-or-pruned pages that were answered from statistics
    pub fn page_pruning_ratio(&self) -> f64 {
        let total = self.scan.pages_from_statistics + self.scan.pages_decoded;
        if total == 0 {
            0.0
        } else {
            self.scan.pages_from_statistics as f64 / total as f64
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executes one aggregation plan against a storage engine
pub struct AggregationExecutor {
    plan: AggregationPlan,
    resources: Arc<QueryResourceManager>,
    config: QueryConfig,
    file_filter: Option<Arc<dyn TsFileFilter>>,
    stats: ExecutionStats,
}

impl AggregationExecutor {
    /// Create an executor for `plan`
    pub fn new(plan: AggregationPlan, resources: Arc<QueryResourceManager>, config: QueryConfig) -> Self {
        Self {
            plan,
            resources,
            config,
            file_filter: None,
            stats: ExecutionStats::default(),
        }
    }

    /// Only read files accepted by `filter`
    pub fn with_file_filter(mut self, filter: Arc<dyn TsFileFilter>) -> Self {
        self.file_filter = Some(filter);
        self
    }

    /// Plan being executed
    pub fn plan(&self) -> &AggregationPlan {
        &self.plan
    }

    /// Accumulated execution statistics
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Fresh context carrying the configured timeout
    pub fn new_context(&self) -> QueryContext {
        let ctx = QueryContext::new();
        match self.config.timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    /// Run the plan
    ///
    /// Results come back in entry order, or rolled up by path prefix when the
    /// plan has a level. Resources opened for `ctx` are released before
    /// returning.
    pub fn execute(&mut self, ctx: &QueryContext) -> Result<AggregateDataSet> {
        let start = Instant::now();
        let path_label = if self.plan.has_value_filter() {
            "value_filter"
        } else {
            "statistics"
        };
        info!(
            query_id = ctx.id(),
            entries = self.plan.len(),
            level = ?self.plan.level,
            path = path_label,
            "Executing aggregation query"
        );

        let outcome = self.run(ctx);

        let elapsed = start.elapsed();
        self.stats.total_queries += 1;
        self.stats.total_execution_time += elapsed;
        metrics::record_query(path_label, elapsed.as_secs_f64(), outcome.is_ok());
        match &outcome {
            Ok(_) => info!(
                query_id = ctx.id(),
                elapsed_us = elapsed.as_micros() as u64,
                "Aggregation query finished"
            ),
            Err(e) => {
                self.stats.failed_queries += 1;
                warn!(query_id = ctx.id(), error = %e, "Aggregation query failed");
            }
        }
        outcome
    }

    fn run(&mut self, ctx: &QueryContext) -> Result<AggregateDataSet> {
        let functions = self.plan.validate()?;
        let filter = self.plan.filter_kind()?;
        ctx.check()?;

        let resources = Arc::clone(&self.resources);
        let _guard = QueryGuard::new(&resources, ctx.id());

        let groups = group_by_series(&self.plan, &functions);
        debug!(
            query_id = ctx.id(),
            series = groups.len(),
            entries = self.plan.len(),
            "Grouped plan by series"
        );

        let outputs = match filter {
            FilterKind::Time(time_filter) => self.aggregate_with_statistics(ctx, &groups, time_filter)?,
            FilterKind::Value(expression) => self.aggregate_with_value_filter(ctx, &groups, &expression)?,
        };
        self.stats.series_scanned += groups.len() as u64;

        let results = scatter(&groups, outputs, self.plan.len())?;
        Ok(assemble(&self.plan.paths, results, self.plan.level)?)
    }

    fn aggregate_with_statistics(
        &mut self,
        ctx: &QueryContext,
        groups: &[SeriesGroup],
        time_filter: Option<TimeFilter>,
    ) -> Result<Vec<Vec<AggregateResult>>> {
        let devices = self.plan.all_measurements_in_device();
        let no_siblings = HashSet::new();
        let resources = self.resources.as_ref();
        let options = ScanOptions {
            time_filter,
            file_filter: self.file_filter.as_deref(),
            reader: ReaderOptions {
                use_statistics: self.config.use_statistics,
            },
        };

        let scan = |group: &SeriesGroup| {
            let request = SeriesRequest {
                path: &group.path,
                measurements: devices.get(&group.path.device()).unwrap_or(&no_siblings),
                data_type: group.data_type,
                functions: &group.functions,
            };
            aggregate_one_series(resources, ctx, &request, &options)
        };

        let scanned: Vec<(Vec<AggregateResult>, ScanStats)> =
            if self.config.parallel_series && groups.len() > 1 {
                let window = self.config.max_parallelism.max(1);
                let mut scanned = Vec::with_capacity(groups.len());
                for batch in groups.chunks(window) {
                    ctx.check()?;
                    let batch: Vec<_> = batch.par_iter().map(|g| scan(g)).collect::<Result<_>>()?;
                    scanned.extend(batch);
                }
                scanned
            } else {
                groups.iter().map(scan).collect::<Result<_>>()?
            };

        let mut outputs = Vec::with_capacity(scanned.len());
        for (results, stats) in scanned {
            self.stats.scan.merge(&stats);
            outputs.push(results);
        }
        Ok(outputs)
    }

    fn aggregate_with_value_filter(
        &mut self,
        ctx: &QueryContext,
        groups: &[SeriesGroup],
        expression: &Expression,
    ) -> Result<Vec<Vec<AggregateResult>>> {
        let file_filter = self.file_filter.as_deref();
        let mut generator = ServerTimeGenerator::new(expression, &self.resources, ctx, file_filter)?;
        let time_filter = generator.time_filter();
        let devices = self.plan.all_measurements_in_device();

        let mut lanes = groups
            .iter()
            .map(|group| {
                let siblings = devices.get(&group.path.device()).cloned().unwrap_or_default();
                let reader = leaf_reader(
                    &group.path,
                    siblings,
                    group.data_type,
                    time_filter,
                    file_filter,
                    &self.resources,
                    ctx,
                )?;
                let accumulator = AggregateAccumulator::new(&group.functions, group.data_type)?;
                Ok((SeriesReaderByTimestamp::new(reader), accumulator))
            })
            .collect::<Result<Vec<_>>>()?;

        let fetch_size = self.config.aggregate_fetch_size.max(1);
        loop {
            ctx.check()?;
            let timestamps = generator.next_batch(fetch_size)?;
            if timestamps.is_empty() {
                break;
            }
            self.stats.value_filter_batches += 1;
            self.stats.timestamps_generated += timestamps.len() as u64;
            trace!(
                query_id = ctx.id(),
                first = timestamps[0],
                count = timestamps.len(),
                "Fetched timestamp batch"
            );

            for (reader, accumulator) in lanes.iter_mut() {
                if accumulator.is_saturated() {
                    continue;
                }
                let values = reader.values_at(&timestamps)?;
                for (timestamp, value) in timestamps.iter().zip(values) {
                    if let Some(value) = value {
                        accumulator.update_from_point(*timestamp, &value);
                    }
                }
            }
            if timestamps.len() < fetch_size {
                break;
            }
        }

        Ok(lanes
            .into_iter()
            .map(|(_, accumulator)| accumulator.into_results())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ValueFilter;
    use crate::query::error::QueryErrorKind;
    use crate::storage::source::MemoryStorage;
    use crate::storage::tsfile::Layout;
    use crate::types::{TimeValuePair, Value};

    fn path(p: &str) -> SeriesPath {
        SeriesPath::parse(p).unwrap()
    }

    fn storage_with(series: &[(&str, Vec<TimeValuePair>)]) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let mut next_id = 1;
        for (p, points) in series {
            let files = Layout::new(10, 2, 2)
                .split(&path(p), DataType::Int64, points, next_id)
                .unwrap();
            next_id += files.len() as u64;
            storage.add_files(files);
        }
        storage
    }

    fn ints(range: std::ops::Range<i64>) -> Vec<TimeValuePair> {
        range.map(|i| TimeValuePair::new(i, Value::Int64(i))).collect()
    }

    fn run(storage: Arc<MemoryStorage>, plan: AggregationPlan, config: QueryConfig) -> Result<AggregateDataSet> {
        let resources = Arc::new(QueryResourceManager::new(storage));
        let mut executor = AggregationExecutor::new(plan, resources, config);
        let ctx = executor.new_context();
        executor.execute(&ctx)
    }

    #[test]
    fn test_group_by_series_dedups() {
        let plan = AggregationPlan::new()
            .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
            .aggregate(path("root.sg.d1.s2"), "count", DataType::Int64)
            .aggregate(path("root.sg.d1.s1"), "max_value", DataType::Int64)
            .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64);
        let functions = plan.validate().unwrap();
        let groups = group_by_series(&plan, &functions);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].path, path("root.sg.d1.s1"));
        assert_eq!(
            groups[0].functions,
            vec![AggregateFunction::Count, AggregateFunction::MaxValue]
        );
        assert_eq!(groups[0].targets, vec![(0, 0), (2, 1), (3, 0)]);
        assert_eq!(groups[1].targets, vec![(1, 0)]);
    }

    #[test]
    fn test_count_and_sum() {
        let storage = storage_with(&[("root.sg.d1.s1", ints(0..100))]);
        let plan = AggregationPlan::new()
            .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
            .aggregate(path("root.sg.d1.s1"), "sum", DataType::Int64);
        let data = run(storage, plan, QueryConfig::default()).unwrap();
        let record = data.as_record().unwrap();
        assert_eq!(
            record.values(),
            vec![Some(Value::Int64(100)), Some(Value::Double(4950.0))]
        );
    }

    #[test]
    fn test_series_opened_once() {
        let storage = storage_with(&[("root.sg.d1.s1", ints(0..50))]);
        let plan = AggregationPlan::new()
            .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
            .aggregate(path("root.sg.d1.s1"), "max_value", DataType::Int64);
        run(storage.clone(), plan, QueryConfig::default()).unwrap();
        assert_eq!(storage.open_count(&path("root.sg.d1.s1")), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let storage = storage_with(&[
            ("root.sg.d1.s1", ints(0..40)),
            ("root.sg.d1.s2", ints(10..90)),
            ("root.sg.d2.s1", ints(5..25)),
        ]);
        let plan = AggregationPlan::new()
            .aggregate(path("root.sg.d1.s1"), "avg", DataType::Int64)
            .aggregate(path("root.sg.d1.s2"), "min_time", DataType::Int64)
            .aggregate(path("root.sg.d2.s1"), "last_value", DataType::Int64)
            .with_time_filter(TimeFilter::between(12, 30));

        let sequential = run(storage.clone(), plan.clone(), QueryConfig::default().with_parallel(false)).unwrap();
        let parallel = run(
            storage,
            plan,
            QueryConfig::default().with_parallel(true).with_max_parallelism(2),
        )
        .unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_value_filter() {
        let storage = storage_with(&[("root.sg.d1.s1", ints(0..10)), ("root.sg.d1.s2", ints(0..10))]);
        let predicate = Expression::series(path("root.sg.d1.s2"), DataType::Int64, ValueFilter::gt(Value::Int64(6)));
        let plan = AggregationPlan::new()
            .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
            .aggregate(path("root.sg.d1.s1"), "first_value", DataType::Int64)
            .with_expression(predicate);
        let data = run(storage, plan, QueryConfig::default().with_fetch_size(2)).unwrap();
        assert_eq!(
            data.as_record().unwrap().values(),
            vec![Some(Value::Int64(3)), Some(Value::Int64(7))]
        );
    }

    #[test]
    fn test_value_filter_batches_device_metadata() {
        use crate::storage::tsfile::{Chunk, Page, TsFileResource};

        let s1 = path("root.sg.d1.s1");
        let s2 = path("root.sg.d1.s2");
        let page = || Page::new(DataType::Int64, ints(0..10)).unwrap();
        let storage = storage_with(&[("root.sg.d2.p", ints(0..10))]);
        storage.add_file(
            TsFileResource::builder(100)
                .chunk(&s1, Chunk::new("s1", DataType::Int64, vec![page()]).unwrap())
                .unwrap()
                .chunk(&s2, Chunk::new("s2", DataType::Int64, vec![page()]).unwrap())
                .unwrap()
                .build(),
        );
        let predicate = Expression::series(path("root.sg.d2.p"), DataType::Int64, ValueFilter::gt(Value::Int64(6)));
        let plan = AggregationPlan::new()
            .aggregate(s1, "count", DataType::Int64)
            .aggregate(s2, "count", DataType::Int64)
            .with_expression(predicate);
        let resources = Arc::new(QueryResourceManager::new(storage));
        let mut executor = AggregationExecutor::new(plan, resources, QueryConfig::default());
        let ctx = QueryContext::new();

        let data = executor.execute(&ctx).unwrap();
        assert_eq!(
            data.as_record().unwrap().values(),
            vec![Some(Value::Int64(3)), Some(Value::Int64(3))]
        );
        // One load for the predicate's device, one shared by s1 and s2
        assert_eq!(ctx.metadata_cache().loads(), 2);
    }

    #[test]
    fn test_errors_release_resources() {
        let storage = storage_with(&[("root.sg.d1.s1", ints(0..10))]);
        storage.set_unavailable(&path("root.sg.d1.s2"), "disk gone");
        let resources = Arc::new(QueryResourceManager::new(storage.clone()));
        let plan = AggregationPlan::new()
            .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
            .aggregate(path("root.sg.d1.s2"), "count", DataType::Int64);
        let mut executor = AggregationExecutor::new(plan, resources.clone(), QueryConfig::default().with_parallel(false));
        let ctx = QueryContext::new();

        assert!(executor.execute(&ctx).is_err());
        assert_eq!(resources.open_queries(), 0);
        assert!(storage.files().iter().all(|f| f.open_handles() == 0));
        assert_eq!(executor.stats().failed_queries, 1);
    }

    #[test]
    fn test_invalid_plan_touches_nothing() {
        let storage = storage_with(&[("root.sg.d1.s1", ints(0..10))]);
        let plan = AggregationPlan::new().aggregate(path("root.sg.d1.s1"), "median", DataType::Int64);
        let err = run(storage.clone(), plan, QueryConfig::default()).unwrap_err();
        match err {
            Error::Query(e) => assert_eq!(e.kind, QueryErrorKind::UnsupportedFunction),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(storage.open_count(&path("root.sg.d1.s1")), 0);
    }

    #[test]
    fn test_stats_accumulate() {
        let storage = storage_with(&[("root.sg.d1.s1", ints(0..100))]);
        let resources = Arc::new(QueryResourceManager::new(storage));
        let plan = AggregationPlan::new().aggregate(path("root.sg.d1.s1"), "count", DataType::Int64);
        let mut executor = AggregationExecutor::new(plan, resources, QueryConfig::default());
        executor.execute(&QueryContext::new()).unwrap();
        executor.execute(&QueryContext::new()).unwrap();

        let stats = executor.stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.series_scanned, 2);
        assert!(stats.scan.files_from_statistics > 0);
        assert_eq!(stats.scan.pages_decoded, 0);
    }
}
