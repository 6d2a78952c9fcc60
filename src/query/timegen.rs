//! Timestamp generation for value-filtered aggregation
//!
//! A [`ServerTimeGenerator`] turns a filter [`Expression`] into the ordered
//! stream of timestamps at which the expression holds:
//!
//! ```text
//!            Or                   union of ordered streams
//!          /    \
//!       And      s3 < 0           intersection of ordered streams
//!      /   \
//!  s1 > 5   s2 == 1               leaf: walk the series, keep matching points
//! ```
//!
//! Global time filters AND-ed at the top of the tree are pushed into every
//! leaf reader. A global time filter below an `Or` has no single window to
//! push and is rejected.

use crate::error::Result;
use crate::filter::{and_filters, Expression, TimeFilter, ValueFilter};
use crate::path::SeriesPath;
use crate::query::context::{QueryContext, QueryResourceManager};
use crate::query::error::QueryError;
use crate::storage::reader::{next_page_from, ReaderOptions, SeriesAggregateReader};
use crate::storage::source::TsFileFilter;
use crate::storage::tsfile::PageData;
use crate::types::{DataType, Timestamp};
use std::collections::HashSet;

/// Ordered source of qualifying timestamps
pub trait TimestampGenerator {
    /// Next timestamp, strictly greater than the previous one, or `None` when exhausted
    fn next_timestamp(&mut self) -> Result<Option<Timestamp>>;

    /// Up to `max` further timestamps
    fn next_batch(&mut self, max: usize) -> Result<Vec<Timestamp>> {
        let mut batch = Vec::with_capacity(max.min(4096));
        while batch.len() < max {
            match self.next_timestamp()? {
                Some(t) => batch.push(t),
                None => break,
            }
        }
        Ok(batch)
    }
}

/// Split an expression into its top-level global time window and the value part
///
/// Fails if a global time filter appears under a disjunction.
pub fn split_global_time(
    expression: &Expression,
) -> std::result::Result<(Option<TimeFilter>, Option<Expression>), QueryError> {
    match expression {
        Expression::GlobalTime { filter } => Ok((Some(*filter), None)),
        Expression::Series { .. } => Ok((None, Some(expression.clone()))),
        Expression::And { left, right } => {
            let (lt, lv) = split_global_time(left)?;
            let (rt, rv) = split_global_time(right)?;
            let value = match (lv, rv) {
                (Some(l), Some(r)) => Some(Expression::and(l, r)),
                (Some(v), None) | (None, Some(v)) => Some(v),
                (None, None) => None,
            };
            Ok((and_filters(lt, rt), value))
        }
        Expression::Or { left, right } => {
            if contains_global_time(left) || contains_global_time(right) {
                return Err(QueryError::validation(
                    "global time filter under OR cannot be pushed down",
                ));
            }
            Ok((None, Some(expression.clone())))
        }
    }
}

fn contains_global_time(expression: &Expression) -> bool {
    match expression {
        Expression::GlobalTime { .. } => true,
        Expression::Series { .. } => false,
        Expression::And { left, right } | Expression::Or { left, right } => {
            contains_global_time(left) || contains_global_time(right)
        }
    }
}

// ============================================================================
// Generator nodes
// ============================================================================

trait Node {
    fn next(&mut self) -> Result<Option<Timestamp>>;
}

struct LeafNode {
    reader: SeriesAggregateReader,
    filter: ValueFilter,
    page: PageData,
    cursor: usize,
    last: Option<Timestamp>,
}

impl Node for LeafNode {
    fn next(&mut self) -> Result<Option<Timestamp>> {
        loop {
            while self.cursor < self.page.len() {
                let t = self.page.timestamps[self.cursor];
                let hit = self.filter.satisfy(&self.page.values[self.cursor]);
                self.cursor += 1;
                if hit && self.last.map_or(true, |last| t > last) {
                    self.last = Some(t);
                    return Ok(Some(t));
                }
            }
            match next_page_from(&mut self.reader, None)? {
                Some(page) => {
                    self.page = page;
                    self.cursor = 0;
                }
                None => return Ok(None),
            }
        }
    }
}

struct Peeked {
    node: Box<dyn Node + Send>,
    head: Option<Option<Timestamp>>,
}

impl Peeked {
    fn new(node: Box<dyn Node + Send>) -> Self {
        Self { node, head: None }
    }

    fn peek(&mut self) -> Result<Option<Timestamp>> {
        if let Some(head) = self.head {
            return Ok(head);
        }
        let head = self.node.next()?;
        self.head = Some(head);
        Ok(head)
    }

    fn consume(&mut self) {
        self.head = None;
    }
}

struct AndNode {
    left: Peeked,
    right: Peeked,
}

impl Node for AndNode {
    fn next(&mut self) -> Result<Option<Timestamp>> {
        loop {
            let (Some(l), Some(r)) = (self.left.peek()?, self.right.peek()?) else {
                return Ok(None);
            };
            if l == r {
                self.left.consume();
                self.right.consume();
                return Ok(Some(l));
            }
            if l < r {
                self.left.consume();
            } else {
                self.right.consume();
            }
        }
    }
}

struct OrNode {
    left: Peeked,
    right: Peeked,
}

impl Node for OrNode {
    fn next(&mut self) -> Result<Option<Timestamp>> {
        match (self.left.peek()?, self.right.peek()?) {
            (Some(l), Some(r)) => {
                if l <= r {
                    self.left.consume();
                }
                if r <= l {
                    self.right.consume();
                }
                Ok(Some(l.min(r)))
            }
            (Some(l), None) => {
                self.left.consume();
                Ok(Some(l))
            }
            (None, Some(r)) => {
                self.right.consume();
                Ok(Some(r))
            }
            (None, None) => Ok(None),
        }
    }
}

// ============================================================================
// Server-side generator
// ============================================================================

/// [`TimestampGenerator`] evaluating an expression against stored series
pub struct ServerTimeGenerator {
    root: Box<dyn Node + Send>,
    time_filter: Option<TimeFilter>,
    series: Vec<SeriesPath>,
}

impl ServerTimeGenerator {
    /// Build the generator, opening one reader per series leaf
    pub fn new(
        expression: &Expression,
        resources: &QueryResourceManager,
        ctx: &QueryContext,
        file_filter: Option<&dyn TsFileFilter>,
    ) -> Result<Self> {
        let (time_filter, value) = split_global_time(expression)?;
        let value = value.ok_or_else(|| {
            QueryError::malformed("value-filtered aggregation needs a series predicate")
        })?;
        let mut series = Vec::new();
        let scope = LeafScope {
            time_filter,
            file_filter,
            resources,
            ctx,
        };
        let root = build_node(&value, &scope, &mut series)?;
        Ok(Self {
            root,
            time_filter,
            series,
        })
    }

    /// Global time window pushed into the leaves
    pub fn time_filter(&self) -> Option<TimeFilter> {
        self.time_filter
    }

    /// Series read by the predicate leaves, in tree order
    pub fn series(&self) -> &[SeriesPath] {
        &self.series
    }
}

impl TimestampGenerator for ServerTimeGenerator {
    fn next_timestamp(&mut self) -> Result<Option<Timestamp>> {
        self.root.next()
    }
}

struct LeafScope<'a> {
    time_filter: Option<TimeFilter>,
    file_filter: Option<&'a dyn TsFileFilter>,
    resources: &'a QueryResourceManager,
    ctx: &'a QueryContext,
}

fn build_node(
    expression: &Expression,
    scope: &LeafScope<'_>,
    series: &mut Vec<SeriesPath>,
) -> Result<Box<dyn Node + Send>> {
    match expression {
        Expression::Series {
            path,
            data_type,
            filter,
        } => {
            series.push(path.clone());
            let reader = leaf_reader(
                path,
                HashSet::new(),
                *data_type,
                scope.time_filter,
                scope.file_filter,
                scope.resources,
                scope.ctx,
            )?;
            Ok(Box::new(LeafNode {
                reader,
                filter: filter.bind(*data_type)?,
                page: PageData::default(),
                cursor: 0,
                last: None,
            }))
        }
        Expression::And { left, right } => Ok(Box::new(AndNode {
            left: Peeked::new(build_node(left, scope, series)?),
            right: Peeked::new(build_node(right, scope, series)?),
        })),
        Expression::Or { left, right } => Ok(Box::new(OrNode {
            left: Peeked::new(build_node(left, scope, series)?),
            right: Peeked::new(build_node(right, scope, series)?),
        })),
        Expression::GlobalTime { .. } => Err(QueryError::malformed(
            "global time filter left inside a value expression",
        )
        .into()),
    }
}

/// Reader for a series, scoped by the time filter narrowed with the series' TTL
///
/// `measurements` are the sibling measurements of the same device that the
/// query also reads, loaded together with the series' chunk metadata.
pub(crate) fn leaf_reader(
    path: &SeriesPath,
    measurements: HashSet<String>,
    data_type: DataType,
    time_filter: Option<TimeFilter>,
    file_filter: Option<&dyn TsFileFilter>,
    resources: &QueryResourceManager,
    ctx: &QueryContext,
) -> Result<SeriesAggregateReader> {
    let mut source = resources.query_data_source(ctx, path, time_filter.as_ref())?;
    if let Some(file_filter) = file_filter {
        source.filter_files(file_filter);
    }
    let time_filter = source.update_filter_using_ttl(time_filter, ctx.query_time());
    Ok(SeriesAggregateReader::new(
        path.clone(),
        measurements,
        data_type,
        source,
        time_filter,
        ReaderOptions {
            use_statistics: false,
        },
        ctx.metadata_cache().clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ValueFilter;
    use crate::storage::source::MemoryStorage;
    use crate::storage::tsfile::Layout;
    use crate::types::{TimeValuePair, Value};
    use std::sync::Arc;

    fn setup() -> (QueryResourceManager, SeriesPath, SeriesPath) {
        let s1 = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let s2 = SeriesPath::parse("root.sg.d1.s2").unwrap();
        let storage = MemoryStorage::new();
        let p1: Vec<_> = (0..10).map(|i| TimeValuePair::new(i, Value::Int64(i))).collect();
        let p2: Vec<_> = (0..10)
            .map(|i| TimeValuePair::new(i, Value::Int64(i % 2)))
            .collect();
        let layout = Layout::new(3, 2, 1);
        storage.add_files(layout.split(&s1, DataType::Int64, &p1, 1).unwrap());
        storage.add_files(layout.split(&s2, DataType::Int64, &p2, 100).unwrap());
        (QueryResourceManager::new(Arc::new(storage)), s1, s2)
    }

    fn drain(generator: &mut ServerTimeGenerator) -> Vec<Timestamp> {
        generator.next_batch(usize::MAX).unwrap()
    }

    #[test]
    fn test_leaf() {
        let (resources, s1, _) = setup();
        let ctx = QueryContext::new();
        let expr = Expression::series(s1, DataType::Int64, ValueFilter::gt(Value::Int64(6)));
        let mut generator = ServerTimeGenerator::new(&expr, &resources, &ctx, None).unwrap();
        assert_eq!(drain(&mut generator), vec![7, 8, 9]);
    }

    #[test]
    fn test_and_or() {
        let (resources, s1, s2) = setup();
        let ctx = QueryContext::new();
        let big = Expression::series(s1.clone(), DataType::Int64, ValueFilter::gt_eq(Value::Int64(5)));
        let odd = Expression::series(s2, DataType::Int64, ValueFilter::equals(Value::Int64(1)));
        let small = Expression::series(s1, DataType::Int64, ValueFilter::lt(Value::Int64(2)));

        let and = Expression::and(big.clone(), odd.clone());
        let mut generator = ServerTimeGenerator::new(&and, &resources, &ctx, None).unwrap();
        assert_eq!(drain(&mut generator), vec![5, 7, 9]);

        let or = Expression::or(Expression::and(big, odd), small);
        let mut generator = ServerTimeGenerator::new(&or, &resources, &ctx, None).unwrap();
        assert_eq!(drain(&mut generator), vec![0, 1, 5, 7, 9]);
    }

    #[test]
    fn test_global_time_pushdown() {
        let (resources, s1, _) = setup();
        let ctx = QueryContext::new();
        let expr = Expression::and(
            Expression::time(TimeFilter::lt(8)),
            Expression::series(s1, DataType::Int64, ValueFilter::gt(Value::Int64(3))),
        );
        let mut generator = ServerTimeGenerator::new(&expr, &resources, &ctx, None).unwrap();
        assert_eq!(generator.time_filter(), Some(TimeFilter::lt(8)));
        assert_eq!(generator.next_batch(2).unwrap(), vec![4, 5]);
        assert_eq!(generator.next_batch(10).unwrap(), vec![6, 7]);
        assert!(generator.next_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_global_time_under_or_rejected() {
        let s1 = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let expr = Expression::or(
            Expression::time(TimeFilter::lt(8)),
            Expression::series(s1, DataType::Int64, ValueFilter::gt(Value::Int64(3))),
        );
        assert!(split_global_time(&expr).is_err());
    }
}
