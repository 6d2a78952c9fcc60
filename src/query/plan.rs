//! Aggregation query plan
//!
//! A plan lists `(series, function, type)` entries in output order, an
//! optional filter expression and an optional rollup level. Validation runs
//! before any data is touched and rejects everything that can be rejected
//! eagerly: malformed entry lists, unknown functions, functions applied to
//! the wrong type, rollups over functions that cannot be merged across
//! series, and filter shapes the engine cannot evaluate.

use crate::aggregation::AggregateFunction;
use crate::filter::{Expression, TimeFilter};
use crate::path::SeriesPath;
use crate::query::error::QueryError;
use crate::query::timegen::split_global_time;
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Aggregation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationPlan {
    /// Series of each entry
    pub paths: Vec<SeriesPath>,
    /// Function name of each entry
    pub aggregations: Vec<String>,
    /// Declared series type of each entry
    pub data_types: Vec<DataType>,
    /// Filter applied to every series
    #[serde(default)]
    pub expression: Option<Expression>,
    /// Roll results up to path prefixes of this level
    #[serde(default)]
    pub level: Option<usize>,
}

/// How a validated plan's filter is evaluated
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    /// No filter, or a time window only: statistics can be used
    Time(Option<TimeFilter>),
    /// At least one value predicate: timestamps are generated first
    Value(Expression),
}

impl AggregationPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn aggregate(mut self, path: SeriesPath, function: &str, data_type: DataType) -> Self {
        self.paths.push(path);
        self.aggregations.push(function.to_string());
        self.data_types.push(data_type);
        self
    }

    /// Set the filter expression
    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Set a global time filter
    pub fn with_time_filter(self, filter: TimeFilter) -> Self {
        self.with_expression(Expression::time(filter))
    }

    /// Roll results up to `level`
    pub fn with_level(mut self, level: usize) -> Self {
        self.level = Some(level);
        self
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the plan has no entries
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether the filter needs the value-filtered path
    pub fn has_value_filter(&self) -> bool {
        self.expression
            .as_ref()
            .map_or(false, Expression::has_value_filter)
    }

    /// Validate the plan, returning the parsed function of every entry
    pub fn validate(&self) -> Result<Vec<AggregateFunction>, QueryError> {
        if self.paths.len() != self.aggregations.len() || self.paths.len() != self.data_types.len() {
            return Err(QueryError::malformed(format!(
                "{} paths, {} aggregations and {} data types",
                self.paths.len(),
                self.aggregations.len(),
                self.data_types.len()
            )));
        }
        if self.paths.is_empty() {
            return Err(QueryError::malformed("no aggregations requested"));
        }

        let mut declared: HashMap<&SeriesPath, DataType> = HashMap::new();
        let mut functions = Vec::with_capacity(self.len());
        for ((path, name), data_type) in self.paths.iter().zip(&self.aggregations).zip(&self.data_types) {
            if let Some(previous) = declared.insert(path, *data_type) {
                if previous != *data_type {
                    return Err(QueryError::malformed(format!(
                        "{} declared as both {} and {}",
                        path, previous, data_type
                    )));
                }
            }
            let function = AggregateFunction::parse(name)?;
            function.check_input(*data_type)?;
            functions.push(function);
        }

        if let Some(level) = self.level {
            self.validate_rollup(level, &functions)?;
        }
        self.filter_kind()?;
        Ok(functions)
    }

    fn validate_rollup(&self, level: usize, functions: &[AggregateFunction]) -> Result<(), QueryError> {
        let mut group_types: HashMap<(String, AggregateFunction), DataType> = HashMap::new();
        for ((path, function), data_type) in self.paths.iter().zip(functions).zip(&self.data_types) {
            if !function.rollup_safe() {
                return Err(QueryError::unsupported_rollup(format!(
                    "{} cannot be rolled up to level {}",
                    function, level
                )));
            }
            if matches!(function, AggregateFunction::MinValue | AggregateFunction::MaxValue) {
                let key = (path.prefix_at_level(level), *function);
                if let Some(previous) = group_types.insert(key, *data_type) {
                    if previous != *data_type {
                        return Err(QueryError::unsupported_rollup(format!(
                            "{} over {} mixes {} and {} series",
                            function,
                            path.prefix_at_level(level),
                            previous,
                            data_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Classify the filter, validating its shape
    pub fn filter_kind(&self) -> Result<FilterKind, QueryError> {
        let Some(expression) = &self.expression else {
            return Ok(FilterKind::Time(None));
        };
        if !expression.has_value_filter() {
            return Ok(FilterKind::Time(Some(expression.to_time_filter()?)));
        }
        split_global_time(expression)?;
        check_predicates(expression)?;
        Ok(FilterKind::Value(expression.clone()))
    }

    /// Measurements referenced per device, for batched metadata loading
    pub fn all_measurements_in_device(&self) -> HashMap<String, HashSet<String>> {
        let mut devices: HashMap<String, HashSet<String>> = HashMap::new();
        for path in &self.paths {
            devices
                .entry(path.device())
                .or_default()
                .insert(path.measurement().to_string());
        }
        devices
    }
}

fn check_predicates(expression: &Expression) -> Result<(), QueryError> {
    match expression {
        Expression::GlobalTime { .. } => Ok(()),
        Expression::Series {
            data_type, filter, ..
        } => filter.bind(*data_type).map(|_| ()),
        Expression::And { left, right } | Expression::Or { left, right } => {
            check_predicates(left)?;
            check_predicates(right)
        }
    }
}
