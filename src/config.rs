//! Configuration management for tsagg
//!
//! TOML configuration files, environment variable overrides, and sensible
//! defaults for query execution, the reference storage layout and logging.

use crate::error::{Error, Result};
use crate::storage::tsfile::Layout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query execution
    #[serde(default)]
    pub query: QueryConfig,

    /// Reference storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Query execution settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Timestamps pulled from the generator per batch on the value-filtered path
    #[serde(default = "default_fetch_size")]
    pub aggregate_fetch_size: usize,

    /// Scan distinct series on the rayon pool
    #[serde(default = "default_true")]
    pub parallel_series: bool,

    /// Upper bound on concurrently scanned series
    #[serde(default = "default_parallelism")]
    pub max_parallelism: usize,

    /// Answer from file/chunk/page statistics when they cover the filter
    #[serde(default = "default_true")]
    pub use_statistics: bool,

    /// Abort queries running longer than this
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Reference storage settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// TTL applied to series without their own, `None` for no expiry
    #[serde(default)]
    pub default_ttl_ms: Option<i64>,

    /// Points per page when splitting loaded series
    #[serde(default = "default_points_per_page")]
    pub points_per_page: usize,

    /// Pages per chunk
    #[serde(default = "default_pages_per_chunk")]
    pub pages_per_chunk: usize,

    /// Chunks per file
    #[serde(default = "default_chunks_per_file")]
    pub chunks_per_file: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Register and update Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-structured log lines
    #[serde(default)]
    pub structured_logging: bool,
}

fn default_fetch_size() -> usize { 10_000 }
fn default_parallelism() -> usize { available_parallelism() }
fn default_points_per_page() -> usize { Layout::default().points_per_page }
fn default_pages_per_chunk() -> usize { Layout::default().pages_per_chunk }
fn default_chunks_per_file() -> usize { Layout::default().chunks_per_file }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            aggregate_fetch_size: default_fetch_size(),
            parallel_series: true,
            max_parallelism: default_parallelism(),
            use_statistics: true,
            timeout_ms: None,
        }
    }
}

impl QueryConfig {
    /// Set the value-filtered batch size
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.aggregate_fetch_size = size;
        self
    }

    /// Enable or disable parallel series scans
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel_series = parallel;
        self
    }

    /// Set the scan parallelism bound
    pub fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n;
        self
    }

    /// Enable or disable statistics use
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.use_statistics = enabled;
        self
    }

    /// Set the query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Query timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: None,
            points_per_page: default_points_per_page(),
            pages_per_chunk: default_pages_per_chunk(),
            chunks_per_file: default_chunks_per_file(),
        }
    }
}

impl StorageConfig {
    /// Layout used to split loaded series into files
    pub fn layout(&self) -> Layout {
        Layout::new(self.points_per_page, self.pages_per_chunk, self.chunks_per_file)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Query
        if let Ok(size) = std::env::var("TSAGG_FETCH_SIZE") {
            if let Ok(n) = size.parse() {
                self.query.aggregate_fetch_size = n;
            }
        }
        if let Ok(parallel) = std::env::var("TSAGG_PARALLEL") {
            if let Ok(p) = parallel.parse() {
                self.query.parallel_series = p;
            }
        }

        // Storage
        if let Ok(ttl) = std::env::var("TSAGG_DEFAULT_TTL_MS") {
            if let Ok(t) = ttl.parse() {
                self.storage.default_ttl_ms = Some(t);
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.query.aggregate_fetch_size == 0 {
            return Err(Error::Configuration("Aggregate fetch size must be > 0".to_string()));
        }
        if self.query.max_parallelism == 0 {
            return Err(Error::Configuration("Max parallelism must be > 0".to_string()));
        }
        if self.query.timeout_ms == Some(0) {
            return Err(Error::Configuration("Query timeout must be > 0".to_string()));
        }
        if let Some(ttl) = self.storage.default_ttl_ms {
            if ttl <= 0 {
                return Err(Error::Configuration("Default TTL must be > 0".to_string()));
            }
        }
        if self.storage.points_per_page == 0
            || self.storage.pages_per_chunk == 0
            || self.storage.chunks_per_file == 0
        {
            return Err(Error::Configuration("Storage layout sizes must be > 0".to_string()));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.query.aggregate_fetch_size, 10_000);
        assert!(config.query.parallel_series);
        assert!(config.query.use_statistics);
        assert!(config.monitoring.metrics_enabled);
        assert_eq!(config.storage.layout(), Layout::default());
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_fetch_size() {
        let mut config = Config::default();
        config.query.aggregate_fetch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [query]
            aggregate_fetch_size = 64
            timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.query.aggregate_fetch_size, 64);
        assert_eq!(config.query.timeout(), Some(Duration::from_millis(500)));
        assert!(config.query.use_statistics);
        assert_eq!(config.storage.default_ttl_ms, None);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("TSAGG_FETCH_SIZE", "128");
        let config = Config::from_env();
        assert_eq!(config.query.aggregate_fetch_size, 128);
        std::env::remove_var("TSAGG_FETCH_SIZE");
    }

    #[test]
    fn test_builder() {
        let q = QueryConfig::default()
            .with_fetch_size(7)
            .with_parallel(false)
            .with_statistics(false)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(q.aggregate_fetch_size, 7);
        assert!(!q.parallel_series);
        assert!(!q.use_statistics);
        assert_eq!(q.timeout_ms, Some(2000));
    }
}
