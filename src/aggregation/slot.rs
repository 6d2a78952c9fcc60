//! State of one aggregate function over one series
//!
//! A slot starts in the identity state of its function and is fed either a
//! whole [`Statistics`] object or decoded points. Comparison of min/max
//! candidates is resolved once per slot from the series type.

use crate::aggregation::function::AggregateFunction;
use crate::numeric::ExactSum;
use crate::query::error::QueryError;
use crate::statistics::Statistics;
use crate::storage::tsfile::PageData;
use crate::types::{DataType, Timestamp, Value};
use std::cmp::Ordering;

// ============================================================================
// Comparators
// ============================================================================

type Comparator = fn(&Value, &Value) -> Option<Ordering>;

fn compare_int32(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_int64(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_float(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        _ => None,
    }
}

fn compare_double(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        _ => None,
    }
}

fn comparator_for(data_type: DataType) -> Comparator {
    match data_type {
        DataType::Int32 => compare_int32,
        DataType::Int64 => compare_int64,
        DataType::Float => compare_float,
        DataType::Double => compare_double,
        DataType::Boolean | DataType::Text => Value::partial_cmp_same,
    }
}

// ============================================================================
// Slot
// ============================================================================

#[derive(Debug, Clone)]
enum SlotState {
    Count(u64),
    Sum(ExactSum),
    Avg { sum: ExactSum, count: u64 },
    Extreme { wanted: Ordering, value: Option<Value> },
    First(Option<Value>),
    Last(Option<(Timestamp, Value)>),
    MinTime(Option<Timestamp>),
    MaxTime(Option<Timestamp>),
}

/// One function's running state
#[derive(Debug, Clone)]
pub struct AggregateSlot {
    function: AggregateFunction,
    data_type: DataType,
    compare: Comparator,
    state: SlotState,
}

impl AggregateSlot {
    /// Create a slot in the identity state of `function`
    ///
    /// Fails when the function cannot aggregate `data_type`.
    pub fn new(function: AggregateFunction, data_type: DataType) -> Result<Self, QueryError> {
        function.check_input(data_type)?;
        let state = match function {
            AggregateFunction::Count => SlotState::Count(0),
            AggregateFunction::Sum => SlotState::Sum(ExactSum::new()),
            AggregateFunction::Avg => SlotState::Avg {
                sum: ExactSum::new(),
                count: 0,
            },
            AggregateFunction::MinValue => SlotState::Extreme {
                wanted: Ordering::Less,
                value: None,
            },
            AggregateFunction::MaxValue => SlotState::Extreme {
                wanted: Ordering::Greater,
                value: None,
            },
            AggregateFunction::FirstValue => SlotState::First(None),
            AggregateFunction::LastValue => SlotState::Last(None),
            AggregateFunction::MinTime => SlotState::MinTime(None),
            AggregateFunction::MaxTime => SlotState::MaxTime(None),
        };
        Ok(Self {
            function,
            data_type,
            compare: comparator_for(data_type),
            state,
        })
    }

    /// Function computed by this slot
    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    /// Type of the aggregated series
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether the result is final regardless of further input
    pub fn is_saturated(&self) -> bool {
        matches!(
            self.state,
            SlotState::First(Some(_)) | SlotState::MinTime(Some(_))
        )
    }

    /// Apply the summary of a range that lies after everything seen so far
    pub fn update_from_statistics(&mut self, stats: &Statistics) {
        let compare = self.compare;
        match &mut self.state {
            SlotState::Count(count) => *count += stats.count,
            SlotState::Sum(sum) => sum.merge(&stats.sum),
            SlotState::Avg { sum, count } => {
                sum.merge(&stats.sum);
                *count += stats.count;
            }
            SlotState::Extreme { wanted, value } => {
                let candidate = if *wanted == Ordering::Less {
                    &stats.min_value
                } else {
                    &stats.max_value
                };
                if let Some(candidate) = candidate {
                    replace_if_better(value, candidate, *wanted, compare);
                }
            }
            SlotState::First(first) => {
                if first.is_none() {
                    *first = Some(stats.first_value.clone());
                }
            }
            SlotState::Last(last) => *last = Some((stats.end_time, stats.last_value.clone())),
            SlotState::MinTime(min) => {
                if min.is_none() {
                    *min = Some(stats.start_time);
                }
            }
            SlotState::MaxTime(max) => *max = Some(stats.end_time),
        }
    }

    /// Apply one raw point
    pub fn update_from_point(&mut self, timestamp: Timestamp, value: &Value) {
        let compare = self.compare;
        match &mut self.state {
            SlotState::Count(count) => *count += 1,
            SlotState::Sum(sum) => sum.add(value.as_f64().unwrap_or(0.0)),
            SlotState::Avg { sum, count } => {
                sum.add(value.as_f64().unwrap_or(0.0));
                *count += 1;
            }
            SlotState::Extreme { wanted, value: current } => {
                replace_if_better(current, value, *wanted, compare);
            }
            SlotState::First(first) => {
                if first.is_none() {
                    *first = Some(value.clone());
                }
            }
            SlotState::Last(last) => *last = Some((timestamp, value.clone())),
            SlotState::MinTime(min) => {
                if min.is_none() {
                    *min = Some(timestamp);
                }
            }
            SlotState::MaxTime(max) => *max = Some(timestamp),
        }
    }

    /// Apply every point of a decoded page, stopping once saturated
    pub fn update_from_page(&mut self, page: &PageData) {
        for (t, v) in page.iter() {
            if self.is_saturated() {
                return;
            }
            self.update_from_point(t, v);
        }
    }

    /// Final value, `None` when the function saw no input
    ///
    /// `count` and `sum` have a defined value over no input (0 and 0.0).
    pub fn result(&self) -> Option<Value> {
        match &self.state {
            SlotState::Count(count) => Some(Value::Int64(*count as i64)),
            SlotState::Sum(sum) => Some(Value::Double(sum.value())),
            SlotState::Avg { sum, count } => {
                (*count > 0).then(|| Value::Double(sum.value() / *count as f64))
            }
            SlotState::Extreme { value, .. } => value.clone(),
            SlotState::First(first) => first.clone(),
            SlotState::Last(last) => last.as_ref().map(|(_, v)| v.clone()),
            SlotState::MinTime(t) | SlotState::MaxTime(t) => t.map(Value::Int64),
        }
    }
}

fn replace_if_better(
    current: &mut Option<Value>,
    candidate: &Value,
    wanted: Ordering,
    compare: Comparator,
) {
    match current {
        Some(existing) if compare(candidate, existing) != Some(wanted) => {}
        Some(_) | None => {
            if compare(candidate, candidate).is_some() {
                *current = Some(candidate.clone());
            }
        }
    }
}
