//! Aggregation result types, rollup and formatters
//!
//! A query yields one [`AggregateRecord`] with a field per requested entry,
//! in request order. With a rollup level the per-series results are merged
//! by path prefix into a [`RollupRecord`] instead: prefixes in sorted order,
//! functions in order of first appearance.

use crate::aggregation::{AggregateFunction, AggregateResult};
use crate::path::SeriesPath;
use crate::query::error::QueryError;
use crate::types::{DataType, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

// ============================================================================
// Result Types
// ============================================================================

/// One aggregated value of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateField {
    /// Series path
    pub path: String,
    /// Function
    pub function: AggregateFunction,
    /// Type of `value`
    pub data_type: DataType,
    /// Value, `None` when the series had no data for it
    pub value: Option<Value>,
}

/// One field per requested entry, in request order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Fields in request order
    pub fields: Vec<AggregateField>,
}

impl AggregateRecord {
    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values in request order
    pub fn values(&self) -> Vec<Option<Value>> {
        self.fields.iter().map(|f| f.value.clone()).collect()
    }

    /// First field matching `path` and `function`
    pub fn get(&self, path: &str, function: AggregateFunction) -> Option<&AggregateField> {
        self.fields
            .iter()
            .find(|f| f.path == path && f.function == function)
    }
}

/// One merged value of a path prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupField {
    /// Path prefix the series were grouped under
    pub prefix: String,
    /// Function
    pub function: AggregateFunction,
    /// Type of `value`
    pub data_type: DataType,
    /// Merged value
    pub value: Option<Value>,
}

/// Results merged by path prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRecord {
    /// Level the paths were truncated to
    pub level: usize,
    /// Fields sorted by prefix, then by function first appearance
    pub fields: Vec<RollupField>,
}

impl RollupRecord {
    /// Field for `prefix` and `function`
    pub fn get(&self, prefix: &str, function: AggregateFunction) -> Option<&RollupField> {
        self.fields
            .iter()
            .find(|f| f.prefix == prefix && f.function == function)
    }

    /// Distinct prefixes in output order
    pub fn prefixes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for f in &self.fields {
            if out.last() != Some(&f.prefix.as_str()) {
                out.push(&f.prefix);
            }
        }
        out
    }
}

/// Output of an aggregation query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateDataSet {
    /// Per-entry results
    Record(AggregateRecord),
    /// Results rolled up by path prefix
    Rollup(RollupRecord),
}

impl AggregateDataSet {
    /// Per-entry record, if no rollup was requested
    pub fn as_record(&self) -> Option<&AggregateRecord> {
        match self {
            AggregateDataSet::Record(r) => Some(r),
            AggregateDataSet::Rollup(_) => None,
        }
    }

    /// Rolled-up record, if a level was requested
    pub fn as_rollup(&self) -> Option<&RollupRecord> {
        match self {
            AggregateDataSet::Rollup(r) => Some(r),
            AggregateDataSet::Record(_) => None,
        }
    }

    /// Render in the requested format
    pub fn format(&self, format: ResultFormat) -> String {
        match format {
            ResultFormat::Json => self.to_json(),
            ResultFormat::JsonPretty => self.to_json_pretty(),
            ResultFormat::Csv => self.to_csv(),
            ResultFormat::Table => self.to_table(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to CSV string
    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        match self {
            AggregateDataSet::Record(record) => {
                output.push_str("path,function,data_type,value\n");
                for f in &record.fields {
                    output.push_str(&format!(
                        "{},{},{},{}\n",
                        f.path,
                        f.function,
                        f.data_type,
                        display_value(&f.value)
                    ));
                }
            }
            AggregateDataSet::Rollup(record) => {
                output.push_str("prefix,function,data_type,value\n");
                for f in &record.fields {
                    output.push_str(&format!(
                        "{},{},{},{}\n",
                        f.prefix,
                        f.function,
                        f.data_type,
                        display_value(&f.value)
                    ));
                }
            }
        }
        output
    }

    /// Convert to an aligned text table
    pub fn to_table(&self) -> String {
        let rows: Vec<[String; 2]> = match self {
            AggregateDataSet::Record(record) => record
                .fields
                .iter()
                .map(|f| [format!("{}({})", f.function, f.path), display_value(&f.value)])
                .collect(),
            AggregateDataSet::Rollup(record) => record
                .fields
                .iter()
                .map(|f| [format!("{}({})", f.function, f.prefix), display_value(&f.value)])
                .collect(),
        };
        let width = rows.iter().map(|r| r[0].len()).max().unwrap_or(0).max(9);
        let mut output = format!("{:<width$} | value\n", "aggregate", width = width);
        output.push_str(&format!("{}-+-{}\n", "-".repeat(width), "-".repeat(5)));
        for [name, value] in rows {
            output.push_str(&format!("{:<width$} | {}\n", name, value, width = width));
        }
        output
    }
}

fn display_value(value: &Option<Value>) -> String {
    value.as_ref().map_or_else(|| "null".to_string(), Value::to_string)
}

/// Output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    /// Compact JSON
    Json,
    /// Indented JSON
    #[default]
    JsonPretty,
    /// Comma separated values
    Csv,
    /// Aligned text table
    Table,
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultFormat::Json => "json",
            ResultFormat::JsonPretty => "json-pretty",
            ResultFormat::Csv => "csv",
            ResultFormat::Table => "table",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResultFormat::Json),
            "json-pretty" | "pretty" => Ok(ResultFormat::JsonPretty),
            "csv" => Ok(ResultFormat::Csv),
            "table" => Ok(ResultFormat::Table),
            other => Err(format!("unknown result format '{}'", other)),
        }
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// Pack per-entry results, rolling them up when `level` is set
///
/// `paths` and `results` are aligned with the request entries.
pub fn assemble(
    paths: &[SeriesPath],
    results: Vec<AggregateResult>,
    level: Option<usize>,
) -> Result<AggregateDataSet, QueryError> {
    if paths.len() != results.len() {
        return Err(QueryError::malformed(format!(
            "{} paths but {} results",
            paths.len(),
            results.len()
        )));
    }
    match level {
        Some(level) => rollup(paths, &results, level).map(AggregateDataSet::Rollup),
        None => Ok(AggregateDataSet::Record(AggregateRecord {
            fields: paths
                .iter()
                .zip(results)
                .map(|(path, r)| AggregateField {
                    path: path.full_path(),
                    function: r.function,
                    data_type: r.data_type,
                    value: r.value,
                })
                .collect(),
        })),
    }
}

/// Merge per-series results by `prefix_at_level(level)`
///
/// Duplicate `(series, function)` entries count once.
pub fn rollup(
    paths: &[SeriesPath],
    results: &[AggregateResult],
    level: usize,
) -> Result<RollupRecord, QueryError> {
    let mut function_order: Vec<AggregateFunction> = Vec::new();
    let mut seen: HashSet<(&SeriesPath, AggregateFunction)> = HashSet::new();
    let mut groups: BTreeMap<String, HashMap<AggregateFunction, (DataType, Option<Value>)>> =
        BTreeMap::new();

    for (path, result) in paths.iter().zip(results) {
        if !result.function.rollup_safe() {
            return Err(QueryError::unsupported_rollup(format!(
                "{} cannot be rolled up",
                result.function
            )));
        }
        if !function_order.contains(&result.function) {
            function_order.push(result.function);
        }
        if !seen.insert((path, result.function)) {
            continue;
        }
        let group = groups.entry(path.prefix_at_level(level)).or_default();
        match group.get_mut(&result.function) {
            Some((data_type, merged)) => {
                if *data_type != result.data_type {
                    return Err(QueryError::unsupported_rollup(format!(
                        "{} mixes {} and {} results",
                        result.function, data_type, result.data_type
                    )));
                }
                let current = merged.take();
                *merged = merge_values(result.function, current, result.value.clone());
            }
            None => {
                group.insert(result.function, (result.data_type, result.value.clone()));
            }
        }
    }

    let mut fields = Vec::new();
    for (prefix, mut group) in groups {
        for function in &function_order {
            if let Some((data_type, value)) = group.remove(function) {
                fields.push(RollupField {
                    prefix: prefix.clone(),
                    function: *function,
                    data_type,
                    value,
                });
            }
        }
    }
    Ok(RollupRecord { level, fields })
}

fn merge_values(function: AggregateFunction, a: Option<Value>, b: Option<Value>) -> Option<Value> {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (Some(v), None) | (None, Some(v)) => return Some(v),
        (None, None) => return None,
    };
    match function {
        AggregateFunction::Count => Some(Value::Int64(
            a.as_i64().unwrap_or(0).saturating_add(b.as_i64().unwrap_or(0)),
        )),
        AggregateFunction::Sum => Some(Value::Double(
            a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0),
        )),
        AggregateFunction::MinValue => {
            Some(if b.partial_cmp_same(&a) == Some(Ordering::Less) { b } else { a })
        }
        AggregateFunction::MaxValue => {
            Some(if b.partial_cmp_same(&a) == Some(Ordering::Greater) { b } else { a })
        }
        // rejected before merging
        _ => Some(a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(function: AggregateFunction, value: Value) -> AggregateResult {
        AggregateResult {
            function,
            data_type: value.data_type(),
            value: Some(value),
        }
    }

    fn paths(ps: &[&str]) -> Vec<SeriesPath> {
        ps.iter().map(|p| SeriesPath::parse(p).unwrap()).collect()
    }

    #[test]
    fn test_record_keeps_request_order() {
        let ps = paths(&["root.sg.d1.s2", "root.sg.d1.s1"]);
        let set = assemble(
            &ps,
            vec![
                result(AggregateFunction::Count, Value::Int64(3)),
                result(AggregateFunction::Count, Value::Int64(5)),
            ],
            None,
        )
        .unwrap();
        let record = set.as_record().unwrap();
        assert_eq!(record.fields[0].path, "root.sg.d1.s2");
        assert_eq!(record.values(), vec![Some(Value::Int64(3)), Some(Value::Int64(5))]);
    }

    #[test]
    fn test_rollup_count_and_sum() {
        let ps = paths(&["root.sg.d1.s1", "root.sg.d2.s1", "root.sg.d1.s1", "root.sg.d2.s1"]);
        let results = vec![
            result(AggregateFunction::Count, Value::Int64(10)),
            result(AggregateFunction::Count, Value::Int64(5)),
            result(AggregateFunction::Sum, Value::Double(1.5)),
            result(AggregateFunction::Sum, Value::Double(2.5)),
        ];
        let record = rollup(&ps, &results, 1).unwrap();
        assert_eq!(record.prefixes(), vec!["root.sg"]);
        assert_eq!(
            record.get("root.sg", AggregateFunction::Count).unwrap().value,
            Some(Value::Int64(15))
        );
        assert_eq!(
            record.get("root.sg", AggregateFunction::Sum).unwrap().value,
            Some(Value::Double(4.0))
        );
    }

    #[test]
    fn test_rollup_sorted_by_prefix_and_function_order() {
        let ps = paths(&["root.sg.d2.s1", "root.sg.d1.s1", "root.sg.d1.s1"]);
        let results = vec![
            result(AggregateFunction::MaxValue, Value::Int64(4)),
            result(AggregateFunction::Count, Value::Int64(2)),
            result(AggregateFunction::MaxValue, Value::Int64(7)),
        ];
        let record = rollup(&ps, &results, 2).unwrap();
        let order: Vec<_> = record
            .fields
            .iter()
            .map(|f| (f.prefix.as_str(), f.function))
            .collect();
        assert_eq!(
            order,
            vec![
                ("root.sg.d1", AggregateFunction::MaxValue),
                ("root.sg.d1", AggregateFunction::Count),
                ("root.sg.d2", AggregateFunction::MaxValue),
            ]
        );
    }

    #[test]
    fn test_rollup_duplicate_entries_count_once() {
        let ps = paths(&["root.sg.d1.s1", "root.sg.d1.s1"]);
        let results = vec![
            result(AggregateFunction::Count, Value::Int64(10)),
            result(AggregateFunction::Count, Value::Int64(10)),
        ];
        let record = rollup(&ps, &results, 1).unwrap();
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.fields[0].value, Some(Value::Int64(10)));
    }

    #[test]
    fn test_rollup_min_with_missing_values() {
        let ps = paths(&["root.sg.d1.s1", "root.sg.d2.s1"]);
        let results = vec![
            AggregateResult {
                function: AggregateFunction::MinValue,
                data_type: DataType::Double,
                value: None,
            },
            result(AggregateFunction::MinValue, Value::Double(-2.0)),
        ];
        let record = rollup(&ps, &results, 1).unwrap();
        assert_eq!(record.fields[0].value, Some(Value::Double(-2.0)));
    }

    #[test]
    fn test_rollup_rejects_unsafe_function() {
        let ps = paths(&["root.sg.d1.s1"]);
        let results = vec![result(AggregateFunction::FirstValue, Value::Int64(1))];
        assert!(rollup(&ps, &results, 1).is_err());
    }

    #[test]
    fn test_formats() {
        let ps = paths(&["root.sg.d1.s1"]);
        let set = assemble(&ps, vec![result(AggregateFunction::Count, Value::Int64(3))], None).unwrap();
        assert_eq!(set.to_csv(), "path,function,data_type,value\nroot.sg.d1.s1,count,INT64,3\n");
        assert!(set.to_json().contains("\"kind\":\"record\""));
        assert!(set.to_table().contains("count(root.sg.d1.s1)"));
        assert_eq!("csv".parse::<ResultFormat>().unwrap(), ResultFormat::Csv);
    }
}
