//! Core data types used throughout the aggregation engine
//!
//! This module defines the fundamental value model shared by storage,
//! statistics and the aggregation layer:
//!
//! # Key Types
//!
//! - **`DataType`**: The closed set of series value types
//! - **`Value`**: A single typed value (one variant per `DataType`)
//! - **`TimeValuePair`**: A timestamped value as decoded from a page
//! - **`TimeRange`**: Closed time window `[start, end]`
//!
//! # Example
//!
//! ```rust
//! use tsagg::types::{DataType, TimeRange, Value};
//!
//! let v = Value::Int64(42);
//! assert_eq!(v.data_type(), DataType::Int64);
//! assert_eq!(v.as_f64(), Some(42.0));
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1500));
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Value type of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    /// `true` / `false`
    Boolean,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// UTF-8 text
    Text,
}

impl DataType {
    /// Whether values of this type can be summed and ordered numerically
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float | DataType::Double
        )
    }

    /// Parse a type name as used in plans and fixtures (`INT64`, `double`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Some(DataType::Boolean),
            "INT32" | "INT" => Some(DataType::Int32),
            "INT64" | "LONG" => Some(DataType::Int64),
            "FLOAT" => Some(DataType::Float),
            "DOUBLE" => Some(DataType::Double),
            "TEXT" | "STRING" => Some(DataType::Text),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Text => "TEXT",
        };
        f.write_str(name)
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value
    Boolean(bool),
    /// 32-bit integer value
    Int32(i32),
    /// 64-bit integer value
    Int64(i64),
    /// 32-bit float value
    Float(f32),
    /// 64-bit float value
    Double(f64),
    /// Text value
    Text(String),
}

impl Value {
    /// The `DataType` this value belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Text(_) => DataType::Text,
        }
    }

    /// Numeric view of the value, `None` for booleans and text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Boolean(_) | Value::Text(_) => None,
        }
    }

    /// Integer view of the value, used for count-like results
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce a JSON-ish number into a value of the requested type
    ///
    /// Used when fixtures or predicates carry untyped literals.
    pub fn coerce(self, data_type: DataType) -> Option<Value> {
        if self.data_type() == data_type {
            return Some(self);
        }
        match data_type {
            DataType::Int32 => self
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int32),
            DataType::Int64 => self.as_i64().map(Value::Int64),
            DataType::Float => self.as_f64().map(|v| Value::Float(v as f32)),
            DataType::Double => self.as_f64().map(Value::Double),
            DataType::Boolean | DataType::Text => None,
        }
    }

    /// Compare two values of the same type
    ///
    /// Returns `None` when the variants differ or a float comparison involves NaN.
    pub fn partial_cmp_same(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

/// A timestamped value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeValuePair {
    /// Timestamp in milliseconds
    pub timestamp: Timestamp,
    /// Value at `timestamp`
    pub value: Value,
}

impl TimeValuePair {
    /// Create a new pair
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// Time range for queries and statistics
///
/// Both ends are inclusive.
///
/// # Example
///
/// ```rust
/// use tsagg::types::TimeRange;
///
/// let range = TimeRange::new(1000, 2000).unwrap();
///
/// assert!(range.contains(1000));  // Start is inclusive
/// assert!(range.contains(2000));  // End is inclusive
/// assert!(!range.contains(2001));
///
/// assert!(TimeRange::new(2000, 1000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: Timestamp,

    /// End timestamp in milliseconds (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, crate::error::Error> {
        if start > end {
            return Err(crate::error::Error::Configuration(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a range without checking `start <= end`
    pub fn new_unchecked(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Whether `other` lies entirely inside this range
    pub fn encloses(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Whether the two ranges share at least one timestamp
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }
}
