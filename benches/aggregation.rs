//! Aggregation Benchmarks
//!
//! Statistics pruning against full page decoding, and parallel against
//! sequential series scans.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use tsagg::config::QueryConfig;
use tsagg::filter::{Expression, TimeFilter, ValueFilter};
use tsagg::path::SeriesPath;
use tsagg::query::{AggregationExecutor, AggregationPlan, QueryResourceManager};
use tsagg::storage::{Layout, MemoryStorage};
use tsagg::types::{DataType, TimeValuePair, Value};

// =============================================================================
// Test Data Generators
// =============================================================================

fn series_path(device: usize, sensor: usize) -> SeriesPath {
    SeriesPath::parse(&format!("root.bench.d{}.s{}", device, sensor)).unwrap()
}

/// Storage with `series_count` double series of `points` points each
fn create_storage(series_count: usize, points: i64) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    let layout = Layout::new(256, 16, 8);
    let mut next_id = 1;
    for i in 0..series_count {
        let data: Vec<TimeValuePair> = (0..points)
            .map(|t| TimeValuePair::new(t, Value::Double(100.0 + (t as f64 * 0.1).sin() * 10.0)))
            .collect();
        let files = layout
            .split(&series_path(i / 4, i % 4), DataType::Double, &data, next_id)
            .unwrap();
        next_id += files.len() as u64;
        storage.add_files(files);
    }
    storage
}

fn summary_plan(series_count: usize) -> AggregationPlan {
    let mut plan = AggregationPlan::new();
    for i in 0..series_count {
        for function in ["count", "sum", "max_value", "first_value", "last_value"] {
            plan = plan.aggregate(series_path(i / 4, i % 4), function, DataType::Double);
        }
    }
    plan
}

fn run(storage: &Arc<MemoryStorage>, plan: &AggregationPlan, config: &QueryConfig) {
    let resources = Arc::new(QueryResourceManager::new(storage.clone()));
    let mut executor = AggregationExecutor::new(plan.clone(), resources, config.clone());
    let ctx = executor.new_context();
    black_box(executor.execute(&ctx).unwrap());
}

// =============================================================================
// Statistics vs Decode
// =============================================================================

fn bench_statistics_vs_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics_vs_decode");

    for points in [10_000i64, 100_000] {
        let storage = create_storage(1, points);
        let plan = summary_plan(1).with_time_filter(TimeFilter::between(points / 10, points - points / 10));
        group.throughput(Throughput::Elements(points as u64));

        group.bench_with_input(BenchmarkId::new("statistics", points), &points, |b, _| {
            let config = QueryConfig::default();
            b.iter(|| run(&storage, &plan, &config))
        });
        group.bench_with_input(BenchmarkId::new("decode", points), &points, |b, _| {
            let config = QueryConfig::default().with_statistics(false);
            b.iter(|| run(&storage, &plan, &config))
        });
    }

    group.finish();
}

// =============================================================================
// Parallel vs Sequential
// =============================================================================

fn bench_parallel_vs_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_vs_sequential");

    for series_count in [4, 16, 32] {
        let storage = create_storage(series_count, 20_000);
        let plan = summary_plan(series_count);
        group.throughput(Throughput::Elements(series_count as u64 * 20_000));

        group.bench_with_input(BenchmarkId::new("parallel", series_count), &series_count, |b, _| {
            let config = QueryConfig::default().with_statistics(false).with_parallel(true);
            b.iter(|| run(&storage, &plan, &config))
        });
        group.bench_with_input(BenchmarkId::new("sequential", series_count), &series_count, |b, _| {
            let config = QueryConfig::default().with_statistics(false).with_parallel(false);
            b.iter(|| run(&storage, &plan, &config))
        });
    }

    group.finish();
}

// =============================================================================
// Value Filter
// =============================================================================

fn bench_value_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_filter");
    let storage = create_storage(2, 50_000);
    let predicate = Expression::series(series_path(0, 1), DataType::Double, ValueFilter::gt(Value::Double(105.0)));
    let plan = AggregationPlan::new()
        .aggregate(series_path(0, 0), "count", DataType::Double)
        .aggregate(series_path(0, 0), "avg", DataType::Double)
        .with_expression(predicate);

    for fetch_size in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("fetch_size", fetch_size), &fetch_size, |b, &size| {
            let config = QueryConfig::default().with_fetch_size(size);
            b.iter(|| run(&storage, &plan, &config))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_statistics_vs_decode,
    bench_parallel_vs_sequential,
    bench_value_filter
);
criterion_main!(benches);
