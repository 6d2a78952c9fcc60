//! Hierarchical series paths
//!
//! A series is addressed by a dot separated path such as
//! `root.ln.wf01.wt01.temperature`. The last node is the measurement, the
//! nodes before it name the device. Rollup groups series by the prefix made
//! of the first `level + 1` nodes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between path nodes
pub const PATH_SEPARATOR: char = '.';

/// Full path of one series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesPath {
    nodes: Vec<String>,
}

impl SeriesPath {
    /// Parse a path, requiring at least a device node and a measurement node
    pub fn parse(path: &str) -> Result<Self> {
        let nodes: Vec<String> = path.split(PATH_SEPARATOR).map(str::to_string).collect();
        if nodes.len() < 2 || nodes.iter().any(|n| n.is_empty()) {
            return Err(Error::Configuration(format!("Invalid series path '{}'", path)));
        }
        Ok(Self { nodes })
    }

    /// Build a path from a device path and a measurement name
    pub fn from_device(device: &str, measurement: &str) -> Result<Self> {
        Self::parse(&format!("{}{}{}", device, PATH_SEPARATOR, measurement))
    }

    /// Path nodes from the root down
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Device part of the path (every node but the last)
    pub fn device(&self) -> String {
        self.nodes[..self.nodes.len() - 1].join(".")
    }

    /// Measurement name (last node)
    pub fn measurement(&self) -> &str {
        // parse() guarantees at least two nodes
        &self.nodes[self.nodes.len() - 1]
    }

    /// Full dotted path
    pub fn full_path(&self) -> String {
        self.nodes.join(".")
    }

    /// Prefix made of nodes `0..=level`
    ///
    /// A path with no more than `level + 1` nodes is returned whole.
    pub fn prefix_at_level(&self, level: usize) -> String {
        if self.nodes.len() <= level + 1 {
            return self.full_path();
        }
        self.nodes[..=level].join(".")
    }
}

impl fmt::Display for SeriesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

impl FromStr for SeriesPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SeriesPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SeriesPath> for String {
    fn from(path: SeriesPath) -> Self {
        path.full_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_and_measurement() {
        let path = SeriesPath::parse("root.sg1.d1.s1").unwrap();
        assert_eq!(path.device(), "root.sg1.d1");
        assert_eq!(path.measurement(), "s1");
        assert_eq!(path.to_string(), "root.sg1.d1.s1");
    }

    #[test]
    fn test_invalid_paths() {
        assert!(SeriesPath::parse("root").is_err());
        assert!(SeriesPath::parse("root..s1").is_err());
        assert!(SeriesPath::parse("").is_err());
    }

    #[test]
    fn test_prefix_at_level() {
        let path = SeriesPath::parse("root.sg1.d1.s1").unwrap();
        assert_eq!(path.prefix_at_level(0), "root");
        assert_eq!(path.prefix_at_level(1), "root.sg1");
        assert_eq!(path.prefix_at_level(2), "root.sg1.d1");
        assert_eq!(path.prefix_at_level(3), "root.sg1.d1.s1");
        assert_eq!(path.prefix_at_level(9), "root.sg1.d1.s1");
    }

    #[test]
    fn test_serde_as_string() {
        let path: SeriesPath = serde_json::from_str("\"root.a.b\"").unwrap();
        assert_eq!(path.measurement(), "b");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"root.a.b\"");
    }
}
