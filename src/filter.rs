//! Time filters, value predicates and filter expressions
//!
//! - [`TimeFilter`]: inclusive time window checked against single timestamps
//!   and against the covered range of a statistics object
//! - [`ValueFilter`]: comparison of a series value against a literal
//! - [`Expression`]: the query's filter tree; a tree made only of time
//!   filters selects the statistics path, any series predicate selects the
//!   value-filtered path

use crate::path::SeriesPath;
use crate::query::error::QueryError;
use crate::types::{DataType, TimeRange, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Inclusive time window `[start, end]`
///
/// An empty window (`start > end`) satisfies nothing. Partial overlap with a
/// statistics range is what forces the scan to decode one level deeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFilter {
    /// Lowest accepted timestamp
    pub start: Timestamp,
    /// Highest accepted timestamp
    pub end: Timestamp,
}

impl TimeFilter {
    /// Accept `start <= t <= end`
    pub fn between(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Accept `t > value`
    pub fn gt(value: Timestamp) -> Self {
        Self::between(value.saturating_add(1), Timestamp::MAX)
    }

    /// Accept `t >= value`
    pub fn gt_eq(value: Timestamp) -> Self {
        Self::between(value, Timestamp::MAX)
    }

    /// Accept `t < value`
    pub fn lt(value: Timestamp) -> Self {
        Self::between(Timestamp::MIN, value.saturating_sub(1))
    }

    /// Accept `t <= value`
    pub fn lt_eq(value: Timestamp) -> Self {
        Self::between(Timestamp::MIN, value)
    }

    /// Accept exactly `t == value`
    pub fn at(value: Timestamp) -> Self {
        Self::between(value, value)
    }

    /// Whether nothing can satisfy this filter
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Whether a single timestamp passes
    pub fn satisfy(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Whether every timestamp of `range` passes
    pub fn contains_range(&self, range: &TimeRange) -> bool {
        !self.is_empty() && range.start >= self.start && range.end <= self.end
    }

    /// Whether at least one timestamp of `range` could pass
    pub fn intersects(&self, range: &TimeRange) -> bool {
        !self.is_empty() && range.start <= self.end && range.end >= self.start
    }

    /// Intersection of two filters
    pub fn and(&self, other: &TimeFilter) -> TimeFilter {
        TimeFilter::between(self.start.max(other.start), self.end.min(other.end))
    }
}

/// Combine an optional filter with another one
pub fn and_filters(a: Option<TimeFilter>, b: Option<TimeFilter>) -> Option<TimeFilter> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.and(&b)),
        (Some(f), None) | (None, Some(f)) => Some(f),
        (None, None) => None,
    }
}

/// Whether a timestamp passes an optional filter
pub fn satisfy(filter: Option<&TimeFilter>, timestamp: Timestamp) -> bool {
    filter.map_or(true, |f| f.satisfy(timestamp))
}

/// Comparison operator of a value predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
}

/// Predicate over a series value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueFilter {
    /// Comparison operator
    pub op: CompareOp,
    /// Right-hand literal
    pub operand: Value,
}

impl ValueFilter {
    /// Create a predicate
    pub fn new(op: CompareOp, operand: Value) -> Self {
        Self { op, operand }
    }

    /// `value > operand`
    pub fn gt(operand: Value) -> Self {
        Self::new(CompareOp::Gt, operand)
    }

    /// `value >= operand`
    pub fn gt_eq(operand: Value) -> Self {
        Self::new(CompareOp::GtEq, operand)
    }

    /// `value < operand`
    pub fn lt(operand: Value) -> Self {
        Self::new(CompareOp::Lt, operand)
    }

    /// `value <= operand`
    pub fn lt_eq(operand: Value) -> Self {
        Self::new(CompareOp::LtEq, operand)
    }

    /// `value == operand`
    pub fn equals(operand: Value) -> Self {
        Self::new(CompareOp::Eq, operand)
    }

    /// `value != operand`
    pub fn not_eq(operand: Value) -> Self {
        Self::new(CompareOp::NotEq, operand)
    }

    /// Evaluate against a value of the operand's type
    ///
    /// Values of another type, and NaN comparisons, never satisfy.
    pub fn satisfy(&self, value: &Value) -> bool {
        let Some(ord) = value.partial_cmp_same(&self.operand) else {
            return false;
        };
        match self.op {
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
        }
    }

    /// Align the operand with the series type, e.g. an integer literal on a DOUBLE series
    pub fn bind(&self, data_type: DataType) -> Result<ValueFilter, QueryError> {
        let operand = self.operand.clone().coerce(data_type).ok_or_else(|| {
            QueryError::validation(format!(
                "literal {} cannot be compared with a {} series",
                self.operand, data_type
            ))
        })?;
        Ok(ValueFilter::new(self.op, operand))
    }
}

/// Filter tree attached to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    /// Time filter applying to every series of the query
    GlobalTime {
        /// The time window
        filter: TimeFilter,
    },
    /// Value predicate on one series
    Series {
        /// Series the predicate reads
        path: SeriesPath,
        /// Declared type of that series
        data_type: DataType,
        /// Predicate on its values
        filter: ValueFilter,
    },
    /// Both sides must hold
    And {
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// Either side must hold
    Or {
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
}

impl Expression {
    /// Global time expression
    pub fn time(filter: TimeFilter) -> Self {
        Expression::GlobalTime { filter }
    }

    /// Single series value predicate
    pub fn series(path: SeriesPath, data_type: DataType, filter: ValueFilter) -> Self {
        Expression::Series {
            path,
            data_type,
            filter,
        }
    }

    /// Conjunction
    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Disjunction
    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Whether any leaf is a series value predicate
    pub fn has_value_filter(&self) -> bool {
        match self {
            Expression::GlobalTime { .. } => false,
            Expression::Series { .. } => true,
            Expression::And { left, right } | Expression::Or { left, right } => {
                left.has_value_filter() || right.has_value_filter()
            }
        }
    }

    /// Collapse a time-only tree into one window
    ///
    /// Disjunctions of time windows are not representable as a single
    /// window and are rejected.
    pub fn to_time_filter(&self) -> Result<TimeFilter, QueryError> {
        match self {
            Expression::GlobalTime { filter } => Ok(*filter),
            Expression::And { left, right } => {
                Ok(left.to_time_filter()?.and(&right.to_time_filter()?))
            }
            Expression::Or { .. } => Err(QueryError::validation(
                "disjunction of time filters is not supported",
            )),
            Expression::Series { path, .. } => Err(QueryError::validation(format!(
                "value predicate on {} in a time-only context",
                path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_filter_bounds() {
        let f = TimeFilter::gt(10);
        assert!(!f.satisfy(10));
        assert!(f.satisfy(11));
        let f = TimeFilter::lt(10);
        assert!(f.satisfy(9));
        assert!(!f.satisfy(10));
        assert!(TimeFilter::at(5).satisfy(5));
    }

    #[test]
    fn test_contains_and_intersects() {
        let f = TimeFilter::between(10, 20);
        assert!(f.contains_range(&TimeRange::new_unchecked(10, 20)));
        assert!(!f.contains_range(&TimeRange::new_unchecked(5, 15)));
        assert!(f.intersects(&TimeRange::new_unchecked(5, 15)));
        assert!(!f.intersects(&TimeRange::new_unchecked(21, 30)));
    }

    #[test]
    fn test_empty_filter() {
        let f = TimeFilter::between(10, 20).and(&TimeFilter::between(30, 40));
        assert!(f.is_empty());
        assert!(!f.intersects(&TimeRange::new_unchecked(0, 100)));
        assert!(!f.contains_range(&TimeRange::new_unchecked(15, 15)));
    }

    #[test]
    fn test_value_filter() {
        let f = ValueFilter::gt(Value::Int64(5));
        assert!(f.satisfy(&Value::Int64(6)));
        assert!(!f.satisfy(&Value::Int64(5)));
        assert!(!f.satisfy(&Value::Double(6.0)));
        assert!(ValueFilter::not_eq(Value::Int64(5)).satisfy(&Value::Int64(4)));
    }

    #[test]
    fn test_bind_coerces_literal() {
        let f = ValueFilter::gt_eq(Value::Int64(5)).bind(DataType::Double).unwrap();
        assert_eq!(f.operand, Value::Double(5.0));
        assert!(ValueFilter::equals(Value::Text("x".into())).bind(DataType::Int32).is_err());
    }

    #[test]
    fn test_expression_shape() {
        let path = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let time_only = Expression::and(
            Expression::time(TimeFilter::gt_eq(0)),
            Expression::time(TimeFilter::lt(100)),
        );
        assert!(!time_only.has_value_filter());
        assert_eq!(time_only.to_time_filter().unwrap(), TimeFilter::between(0, 99));

        let value = Expression::and(
            time_only,
            Expression::series(path, DataType::Int64, ValueFilter::gt(Value::Int64(1))),
        );
        assert!(value.has_value_filter());
        assert!(value.to_time_filter().is_err());
    }
}
