//! Integration tests for value-filtered aggregation
//!
//! A value predicate on one series selects timestamps; every aggregated
//! series is then looked up at exactly those timestamps.

use std::sync::Arc;

use tsagg::config::QueryConfig;
use tsagg::filter::{Expression, TimeFilter, ValueFilter};
use tsagg::query::{
    AggregateDataSet, AggregationExecutor, AggregationPlan, QueryContext, QueryErrorKind,
    QueryResourceManager, ServerTimeGenerator, TimestampGenerator,
};
use tsagg::storage::{Layout, MemoryStorage};
use tsagg::types::{DataType, TimeValuePair, Value};
use tsagg::{Error, SeriesPath};

// ============================================================================
// Helper Functions
// ============================================================================

fn path(p: &str) -> SeriesPath {
    SeriesPath::parse(p).expect("valid path")
}

/// `s1` holds 0..10 with value = t, `s2` holds 0..10 with value = t * 10,
/// `sparse` holds only even timestamps with value = t
fn create_storage() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    let layout = Layout::new(3, 2, 1);
    let series: [(&str, Vec<TimeValuePair>); 3] = [
        (
            "root.sg.d1.s1",
            (0..10).map(|t| TimeValuePair::new(t, Value::Int64(t))).collect(),
        ),
        (
            "root.sg.d1.s2",
            (0..10).map(|t| TimeValuePair::new(t, Value::Int64(t * 10))).collect(),
        ),
        (
            "root.sg.d2.sparse",
            (0..10)
                .filter(|t| t % 2 == 0)
                .map(|t| TimeValuePair::new(t, Value::Int64(t)))
                .collect(),
        ),
    ];
    let mut next_id = 1;
    for (p, points) in series {
        let files = layout.split(&path(p), DataType::Int64, &points, next_id).unwrap();
        next_id += files.len() as u64;
        storage.add_files(files);
    }
    storage
}

fn s1_gt(value: i64) -> Expression {
    Expression::series(path("root.sg.d1.s1"), DataType::Int64, ValueFilter::gt(Value::Int64(value)))
}

fn execute(plan: AggregationPlan, config: QueryConfig) -> tsagg::Result<AggregateDataSet> {
    let resources = Arc::new(QueryResourceManager::new(create_storage()));
    let mut executor = AggregationExecutor::new(plan, resources, config);
    let ctx = executor.new_context();
    executor.execute(&ctx)
}

fn values(data: &AggregateDataSet) -> Vec<Option<Value>> {
    data.as_record().expect("plain record").values()
}

// ============================================================================
// Value filters
// ============================================================================

#[test]
fn test_three_of_ten_points_selected() {
    let plan = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s2"), "count", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "sum", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "first_value", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "max_time", DataType::Int64)
        .with_expression(s1_gt(6));

    let data = execute(plan, QueryConfig::default()).unwrap();
    assert_eq!(
        values(&data),
        vec![
            Some(Value::Int64(3)),
            Some(Value::Double(240.0)),
            Some(Value::Int64(70)),
            Some(Value::Int64(9)),
        ]
    );
}

#[test]
fn test_fetch_size_does_not_change_result() {
    let plan = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s2"), "avg", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "last_value", DataType::Int64)
        .with_expression(s1_gt(2));

    let expected = execute(plan.clone(), QueryConfig::default()).unwrap();
    for fetch_size in [1, 2, 3, 7] {
        let data = execute(plan.clone(), QueryConfig::default().with_fetch_size(fetch_size)).unwrap();
        assert_eq!(data, expected, "fetch size {}", fetch_size);
    }
    assert_eq!(
        values(&expected),
        vec![Some(Value::Double(60.0)), Some(Value::Int64(90))]
    );
}

#[test]
fn test_missing_points_are_skipped() {
    let plan = AggregationPlan::new()
        .aggregate(path("root.sg.d2.sparse"), "count", DataType::Int64)
        .aggregate(path("root.sg.d2.sparse"), "min_time", DataType::Int64)
        .with_expression(s1_gt(4));

    let data = execute(plan, QueryConfig::default()).unwrap();
    assert_eq!(values(&data), vec![Some(Value::Int64(2)), Some(Value::Int64(6))]);
}

#[test]
fn test_and_or_predicates() {
    let s2_lt_40 = Expression::series(path("root.sg.d1.s2"), DataType::Int64, ValueFilter::lt(Value::Int64(40)));

    let and = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
        .with_expression(Expression::and(s1_gt(1), s2_lt_40.clone()));
    assert_eq!(values(&execute(and, QueryConfig::default()).unwrap()), vec![Some(Value::Int64(2))]);

    let or = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s1"), "count", DataType::Int64)
        .with_expression(Expression::or(s1_gt(7), s2_lt_40));
    assert_eq!(values(&execute(or, QueryConfig::default()).unwrap()), vec![Some(Value::Int64(6))]);
}

#[test]
fn test_global_time_pushed_down() {
    let plan = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s2"), "count", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "last_value", DataType::Int64)
        .with_expression(Expression::and(s1_gt(2), Expression::time(TimeFilter::lt(6))));

    let data = execute(plan, QueryConfig::default()).unwrap();
    assert_eq!(values(&data), vec![Some(Value::Int64(3)), Some(Value::Int64(50))]);
}

#[test]
fn test_global_time_under_or_rejected() {
    let plan = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s2"), "count", DataType::Int64)
        .with_expression(Expression::or(s1_gt(2), Expression::time(TimeFilter::lt(6))));

    match execute(plan, QueryConfig::default()).unwrap_err() {
        Error::Query(e) => assert_eq!(e.kind, QueryErrorKind::ValidationError),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_predicate_matching_nothing() {
    let plan = AggregationPlan::new()
        .aggregate(path("root.sg.d1.s2"), "count", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "sum", DataType::Int64)
        .aggregate(path("root.sg.d1.s2"), "max_value", DataType::Int64)
        .with_expression(s1_gt(100));

    let data = execute(plan, QueryConfig::default()).unwrap();
    assert_eq!(
        values(&data),
        vec![Some(Value::Int64(0)), Some(Value::Double(0.0)), None]
    );
}

#[test]
fn test_generator_yields_ordered_timestamps() {
    let resources = QueryResourceManager::new(create_storage());
    let ctx = QueryContext::new();
    let sparse_ge_4 = Expression::series(
        path("root.sg.d2.sparse"),
        DataType::Int64,
        ValueFilter::gt_eq(Value::Int64(4)),
    );
    let expression = Expression::or(s1_gt(8), sparse_ge_4);

    let mut generator = ServerTimeGenerator::new(&expression, &resources, &ctx, None).unwrap();
    assert_eq!(generator.next_batch(100).unwrap(), vec![4, 6, 8, 9]);
    assert_eq!(generator.next_timestamp().unwrap(), None);
    assert_eq!(generator.series().len(), 2);

    resources.end_query(ctx.id());
}
