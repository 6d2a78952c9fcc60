//! Aggregate function catalogue
//!
//! | Function      | Input        | Result       | Saturates                       |
//! |---------------|--------------|--------------|---------------------------------|
//! | `count`       | any          | `INT64`      | never                           |
//! | `sum`         | numeric      | `DOUBLE`     | never                           |
//! | `avg`         | numeric      | `DOUBLE`     | never                           |
//! | `min_value`   | numeric      | input type   | never                           |
//! | `max_value`   | numeric      | input type   | never                           |
//! | `first_value` | any          | input type   | on the first value seen         |
//! | `last_value`  | any          | input type   | never (always overwritten)      |
//! | `min_time`    | any          | `INT64`      | on the first timestamp seen     |
//! | `max_time`    | any          | `INT64`      | never (always overwritten)      |
//!
//! Data is visited in non-decreasing time order, which is what makes the
//! first value (and first timestamp) final the moment it is seen.

use crate::query::error::QueryError;
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    /// Number of points
    Count,
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Avg,
    /// Smallest value
    MinValue,
    /// Largest value
    MaxValue,
    /// Value of the earliest point
    FirstValue,
    /// Value of the latest point
    LastValue,
    /// Earliest timestamp
    MinTime,
    /// Latest timestamp
    MaxTime,
}

impl AggregateFunction {
    /// Every function, in catalogue order
    pub const ALL: [AggregateFunction; 9] = [
        AggregateFunction::Count,
        AggregateFunction::Sum,
        AggregateFunction::Avg,
        AggregateFunction::MinValue,
        AggregateFunction::MaxValue,
        AggregateFunction::FirstValue,
        AggregateFunction::LastValue,
        AggregateFunction::MinTime,
        AggregateFunction::MaxTime,
    ];

    /// Parse a function name (case-insensitive, short aliases accepted)
    pub fn parse(name: &str) -> Result<Self, QueryError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "avg" | "mean" => Ok(AggregateFunction::Avg),
            "min_value" | "min" => Ok(AggregateFunction::MinValue),
            "max_value" | "max" => Ok(AggregateFunction::MaxValue),
            "first_value" | "first" => Ok(AggregateFunction::FirstValue),
            "last_value" | "last" => Ok(AggregateFunction::LastValue),
            "min_time" => Ok(AggregateFunction::MinTime),
            "max_time" => Ok(AggregateFunction::MaxTime),
            _ => Err(QueryError::unsupported_function(name)),
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::MinValue => "min_value",
            AggregateFunction::MaxValue => "max_value",
            AggregateFunction::FirstValue => "first_value",
            AggregateFunction::LastValue => "last_value",
            AggregateFunction::MinTime => "min_time",
            AggregateFunction::MaxTime => "max_time",
        }
    }

    /// Whether the input series must be numeric
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            AggregateFunction::Sum
                | AggregateFunction::Avg
                | AggregateFunction::MinValue
                | AggregateFunction::MaxValue
        )
    }

    /// Reject input types the function cannot aggregate
    pub fn check_input(&self, data_type: DataType) -> Result<(), QueryError> {
        if self.requires_numeric() && !data_type.is_numeric() {
            return Err(QueryError::incompatible_type(self, data_type));
        }
        Ok(())
    }

    /// Type of the result for a given input type
    pub fn result_type(&self, input: DataType) -> DataType {
        match self {
            AggregateFunction::Count | AggregateFunction::MinTime | AggregateFunction::MaxTime => {
                DataType::Int64
            }
            AggregateFunction::Sum | AggregateFunction::Avg => DataType::Double,
            AggregateFunction::MinValue
            | AggregateFunction::MaxValue
            | AggregateFunction::FirstValue
            | AggregateFunction::LastValue => input,
        }
    }

    /// Whether per-series results can be merged across series by path prefix
    ///
    /// Only commutative merges qualify; first/last/time functions would need
    /// the series to be disjoint and ordered in time, and avg would need the
    /// per-series counts.
    pub fn rollup_safe(&self) -> bool {
        matches!(
            self,
            AggregateFunction::Count
                | AggregateFunction::Sum
                | AggregateFunction::MinValue
                | AggregateFunction::MaxValue
        )
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!(AggregateFunction::parse("COUNT").unwrap(), AggregateFunction::Count);
        assert_eq!(AggregateFunction::parse("max").unwrap(), AggregateFunction::MaxValue);
        assert_eq!(AggregateFunction::parse("first").unwrap(), AggregateFunction::FirstValue);
        for f in AggregateFunction::ALL {
            assert_eq!(AggregateFunction::parse(f.name()).unwrap(), f);
        }
    }

    #[test]
    fn test_unknown_function() {
        let err = AggregateFunction::parse("median").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::UnsupportedFunction);
    }

    #[test]
    fn test_numeric_requirement() {
        assert!(AggregateFunction::Sum.check_input(DataType::Int32).is_ok());
        let err = AggregateFunction::Sum.check_input(DataType::Text).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::IncompatibleType);
        assert!(AggregateFunction::Count.check_input(DataType::Text).is_ok());
        assert!(AggregateFunction::LastValue.check_input(DataType::Boolean).is_ok());
    }

    #[test]
    fn test_result_types() {
        assert_eq!(AggregateFunction::Count.result_type(DataType::Text), DataType::Int64);
        assert_eq!(AggregateFunction::Sum.result_type(DataType::Int32), DataType::Double);
        assert_eq!(AggregateFunction::MinValue.result_type(DataType::Float), DataType::Float);
        assert_eq!(AggregateFunction::MaxTime.result_type(DataType::Double), DataType::Int64);
    }

    #[test]
    fn test_rollup_allow_list() {
        let safe: Vec<_> = AggregateFunction::ALL
            .iter()
            .filter(|f| f.rollup_safe())
            .map(|f| f.name())
            .collect();
        assert_eq!(safe, vec!["count", "sum", "min_value", "max_value"]);
    }
}
