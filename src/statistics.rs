//! Precomputed summaries of a contiguous time range
//!
//! Every file, chunk and page carries one [`Statistics`] object describing
//! all points it holds: count, time bounds, first and last value, and for
//! numeric series min, max and sum. A statistics object is usable in place
//! of the raw points whenever the query's time filter covers its whole range.

use crate::numeric::ExactSum;
use crate::types::{DataType, TimeRange, TimeValuePair, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Summary of every point in `[start_time, end_time]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Type of the summarised values
    pub data_type: DataType,
    /// Number of points
    pub count: u64,
    /// Timestamp of the first point
    pub start_time: Timestamp,
    /// Timestamp of the last point
    pub end_time: Timestamp,
    /// Value of the first point
    pub first_value: Value,
    /// Value of the last point
    pub last_value: Value,
    /// Smallest value, numeric types only, `None` if no value is ordered
    pub min_value: Option<Value>,
    /// Largest value, numeric types only, `None` if no value is ordered
    pub max_value: Option<Value>,
    /// Exact sum of values, zero for non-numeric types
    pub sum: ExactSum,
}

impl Statistics {
    /// Summarise a time-ordered run of points
    ///
    /// Returns `None` for an empty slice: a range with no points has no
    /// statistics.
    pub fn from_points(data_type: DataType, points: &[TimeValuePair]) -> Option<Self> {
        let (head, tail) = points.split_first()?;
        let mut stats = Self::single(data_type, head);
        for point in tail {
            stats.update(point);
        }
        Some(stats)
    }

    fn single(data_type: DataType, point: &TimeValuePair) -> Self {
        let extreme = (data_type.is_numeric() && is_ordered(&point.value)).then(|| point.value.clone());
        let mut sum = ExactSum::new();
        if data_type.is_numeric() {
            sum.add(point.value.as_f64().unwrap_or(0.0));
        }
        Self {
            data_type,
            count: 1,
            start_time: point.timestamp,
            end_time: point.timestamp,
            first_value: point.value.clone(),
            last_value: point.value.clone(),
            min_value: extreme.clone(),
            max_value: extreme,
            sum,
        }
    }

    /// Fold one more point, which must not precede `end_time`
    pub fn update(&mut self, point: &TimeValuePair) {
        self.count += 1;
        if point.timestamp < self.start_time {
            self.start_time = point.timestamp;
            self.first_value = point.value.clone();
        }
        if point.timestamp >= self.end_time {
            self.end_time = point.timestamp;
            self.last_value = point.value.clone();
        }
        if self.data_type.is_numeric() {
            replace_if(&mut self.min_value, &point.value, Ordering::Less);
            replace_if(&mut self.max_value, &point.value, Ordering::Greater);
            self.sum.add(point.value.as_f64().unwrap_or(0.0));
        }
    }

    /// Merge the statistics of a later, non-overlapping range
    pub fn merge(&mut self, other: &Statistics) {
        self.count += other.count;
        if other.start_time < self.start_time {
            self.start_time = other.start_time;
            self.first_value = other.first_value.clone();
        }
        if other.end_time >= self.end_time {
            self.end_time = other.end_time;
            self.last_value = other.last_value.clone();
        }
        if let Some(min) = &other.min_value {
            replace_if(&mut self.min_value, min, Ordering::Less);
        }
        if let Some(max) = &other.max_value {
            replace_if(&mut self.max_value, max, Ordering::Greater);
        }
        self.sum.merge(&other.sum);
    }

    /// Covered time range
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new_unchecked(self.start_time, self.end_time)
    }
}

/// NaN does not compare to itself and is never an extreme
fn is_ordered(value: &Value) -> bool {
    value.partial_cmp_same(value).is_some()
}

fn replace_if(slot: &mut Option<Value>, candidate: &Value, wanted: Ordering) {
    if !is_ordered(candidate) {
        return;
    }
    match slot {
        Some(current) if is_ordered(current) && candidate.partial_cmp_same(current) != Some(wanted) => {}
        _ => *slot = Some(candidate.clone()),
    }
}

/// Merge a sequence of statistics, `None` if it is empty
pub fn merge_all<'a>(stats: impl IntoIterator<Item = &'a Statistics>) -> Option<Statistics> {
    let mut iter = stats.into_iter();
    let mut merged = iter.next()?.clone();
    for s in iter {
        merged.merge(s);
    }
    Some(merged)
}
