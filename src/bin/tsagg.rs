//! tsagg command line
//!
//! Loads series from a JSON dataset into in-memory storage, runs an
//! aggregation plan against it and prints the result.
//!
//! # Example Usage
//!
//! ```bash
//! # Count and sum over a dataset, pretty JSON
//! tsagg query --dataset data.json --plan plan.json
//!
//! # Same query as a table, without statistics pruning
//! tsagg query --dataset data.json --plan plan.json --format table --no-statistics
//!
//! # Validate a configuration file
//! tsagg --config tsagg.toml check-config
//! ```
//!
//! Dataset format:
//!
//! ```json
//! {
//!   "series": [
//!     {"path": "root.sg.d1.s1", "data_type": "INT64", "points": [[0, 1], [1, 5]]}
//!   ],
//!   "ttl": {"root.sg": 86400000}
//! }
//! ```
//!
//! The plan is a serialized `AggregationPlan`.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tsagg::config::Config;
use tsagg::metrics;
use tsagg::path::SeriesPath;
use tsagg::query::{AggregationExecutor, AggregationPlan, QueryResourceManager, ResultFormat};
use tsagg::storage::MemoryStorage;
use tsagg::types::{DataType, TimeValuePair, Timestamp, Value};

// =============================================================================
// CLI Definition
// =============================================================================

/// tsagg - statistics-pruned time-series aggregation
#[derive(Parser)]
#[command(name = "tsagg")]
#[command(version)]
#[command(about = "Run aggregation queries over time-series data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides TSAGG_CONFIG env var)
    #[arg(short, long, global = true, env = "TSAGG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an aggregation plan against a dataset
    Query {
        /// JSON dataset to load
        #[arg(short, long)]
        dataset: PathBuf,

        /// JSON aggregation plan
        #[arg(short, long)]
        plan: PathBuf,

        /// Output format (json, json-pretty, csv, table)
        #[arg(short, long, default_value = "json-pretty")]
        format: ResultFormat,

        /// Roll results up to this path level
        #[arg(long)]
        level: Option<usize>,

        /// Decode every page instead of using statistics
        #[arg(long)]
        no_statistics: bool,

        /// Scan series one at a time
        #[arg(long)]
        sequential: bool,

        /// Print Prometheus metrics after the result
        #[arg(long)]
        metrics: bool,
    },

    /// Validate configuration file and print summary
    CheckConfig,
}

// =============================================================================
// Dataset loading
// =============================================================================

#[derive(Debug, Deserialize)]
struct Dataset {
    series: Vec<SeriesData>,
    #[serde(default)]
    ttl: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct SeriesData {
    path: SeriesPath,
    data_type: DataType,
    points: Vec<(Timestamp, Value)>,
}

fn load_storage(path: &Path, config: &Config) -> Result<Arc<MemoryStorage>, Box<dyn std::error::Error>> {
    let dataset: Dataset = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let storage = Arc::new(MemoryStorage::with_default_ttl(config.storage.default_ttl_ms));
    let layout = config.storage.layout();

    let mut next_id = 1;
    for series in dataset.series {
        let mut points = Vec::with_capacity(series.points.len());
        for (timestamp, value) in series.points {
            let value = value.coerce(series.data_type).ok_or_else(|| {
                format!("{} at {} is not a {} value", series.path, timestamp, series.data_type)
            })?;
            points.push(TimeValuePair::new(timestamp, value));
        }
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);

        let files = layout.split(&series.path, series.data_type, &points, next_id)?;
        debug!(path = %series.path, points = points.len(), files = files.len(), "Loaded series");
        next_id += files.len() as u64;
        storage.add_files(files);
    }
    for (prefix, ttl) in dataset.ttl {
        storage.set_ttl(&prefix, ttl);
    }
    Ok(storage)
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Command Handlers
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_query(
    config: Config,
    dataset: &Path,
    plan: &Path,
    format: ResultFormat,
    level: Option<usize>,
    no_statistics: bool,
    sequential: bool,
    show_metrics: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = load_storage(dataset, &config)?;
    let mut plan: AggregationPlan = serde_json::from_str(&std::fs::read_to_string(plan)?)?;
    if level.is_some() {
        plan.level = level;
    }

    let mut query_config = config.query.clone();
    if no_statistics {
        query_config.use_statistics = false;
    }
    if sequential {
        query_config.parallel_series = false;
    }

    let resources = Arc::new(QueryResourceManager::new(storage));
    let mut executor = AggregationExecutor::new(plan, resources, query_config);
    let ctx = executor.new_context();
    let data = executor.execute(&ctx)?;

    println!("{}", data.format(format));

    let stats = executor.stats();
    info!(
        series = stats.series_scanned,
        pages_decoded = stats.scan.pages_decoded,
        pages_from_statistics = stats.scan.pages_from_statistics,
        elapsed_us = stats.total_execution_time.as_micros() as u64,
        "Query complete"
    );

    if show_metrics && config.monitoring.metrics_enabled {
        println!();
        print!("{}", metrics::gather_metrics()?);
    }
    Ok(())
}

fn cmd_check_config(config: &Config) {
    println!("Configuration is valid!");
    println!();
    println!("Query Settings:");
    println!("  Aggregate fetch size: {}", config.query.aggregate_fetch_size);
    println!("  Parallel series: {}", config.query.parallel_series);
    println!("  Max parallelism: {}", config.query.max_parallelism);
    println!("  Use statistics: {}", config.query.use_statistics);
    println!("  Timeout: {:?}", config.query.timeout());
    println!();
    println!("Storage Settings:");
    println!("  Default TTL (ms): {:?}", config.storage.default_ttl_ms);
    println!(
        "  Layout: {} points/page, {} pages/chunk, {} chunks/file",
        config.storage.points_per_page, config.storage.pages_per_chunk, config.storage.chunks_per_file
    );
    println!();
    println!("Monitoring:");
    println!("  Metrics enabled: {}", config.monitoring.metrics_enabled);
    println!("  Log level: {}", config.monitoring.log_level);
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.monitoring.structured_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Query {
            dataset,
            plan,
            format,
            level,
            no_statistics,
            sequential,
            metrics,
        } => cmd_query(
            config,
            &dataset,
            &plan,
            format,
            level,
            no_statistics,
            sequential,
            metrics,
        ),
        Commands::CheckConfig => {
            cmd_check_config(&config);
            Ok(())
        }
    }
}
