//! Configuration management for the miner
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Values given on the command line or in
//! the environment take precedence over the file, which takes precedence over
//! the built-in defaults.

use crate::coordinator::CoordinatorOptions;
use crate::crypto::HashAlgorithm;
use crate::types::{Difficulty, WorkOrder};
use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level: tracing::Level = (*self).into();
        write!(f, "{}", level.as_str().to_ascii_lowercase())
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Plain,
    /// One JSON object per line
    Json,
}

/// Complete configuration for the miner
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "blockchain-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Proof-of-work block miner",
    long_about = "Mines a chain of proof-of-work blocks by splitting the nonce space across concurrent workers"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(skip)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Print the mined chain as JSON when done
    #[arg(long)]
    #[serde(skip)]
    pub print_chain: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE", env = "MINER_CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Number of blocks to mine
    #[arg(short = 'b', long, env = "MINER_BLOCKS", default_value = "10")]
    #[serde(default = "default_blocks")]
    pub blocks: usize,

    /// Number of concurrent workers (0 = number of CPUs)
    #[arg(short = 'w', long, env = "MINER_WORKERS", default_value = "0")]
    #[serde(default)]
    pub workers: usize,

    /// Nonces handed to a worker per dispatch
    #[arg(long, env = "MINER_WORKLOAD", default_value = "1000000")]
    #[serde(default = "default_workload")]
    pub workload: u64,

    /// Required leading zero hex digits in a block hash
    #[arg(short = 'd', long, env = "MINER_DIFFICULTY", default_value = "5")]
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    /// Seconds between progress reports
    #[arg(long, env = "MINER_PROGRESS_INTERVAL", default_value = "1")]
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Overall deadline for the session (e.g. "90s", "1h")
    #[arg(short = 't', long, env = "MINER_TIMEOUT", default_value = "1h")]
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Nonces hashed between abort checks
    #[arg(long, env = "MINER_CHUNK_SIZE", default_value = "1000")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Hash function
    #[arg(long, env = "MINER_HASHER", default_value = "sha256")]
    #[serde(default)]
    pub hasher: HashAlgorithm,

    /// Do not replace workers that terminate unexpectedly
    #[arg(long, env = "MINER_NO_WORKER_REPLACEMENT")]
    #[serde(default)]
    pub no_worker_replacement: bool,

    /// Lost workers replaced per session before it fails
    #[arg(long, env = "MINER_MAX_WORKER_RESTARTS", default_value = "10")]
    #[serde(default = "default_max_worker_restarts")]
    pub max_worker_restarts: u32,

    /// Log level
    #[arg(short = 'l', long, env = "MINER_LOG_LEVEL", default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "MINER_LOG_FORMAT", default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

/// Overwrite each listed field with the file value unless it was given explicitly
macro_rules! merge_fields {
    ($config:ident, $file:ident, $matches:ident, [$($field:ident),* $(,)?]) => {
        $(
            if !explicitly_set($matches, stringify!($field)) {
                $config.$field = $file.$field;
            }
        )*
    };
}

fn explicitly_set(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
    )
}

impl Config {
    /// Load configuration from the process arguments, environment and config file
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Load configuration from explicit arguments
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command()
            .try_get_matches_from(args)
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_matches(&matches).await
    }

    async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config.merge_with_file(file_config, matches);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge file values into fields not set on the command line or in the environment
    fn merge_with_file(&mut self, file: Self, matches: &ArgMatches) {
        let config = self;
        merge_fields!(
            config,
            file,
            matches,
            [
                blocks,
                workers,
                workload,
                difficulty,
                progress_interval,
                timeout,
                chunk_size,
                hasher,
                no_worker_replacement,
                max_worker_restarts,
                log_level,
                log_format,
            ]
        );
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.blocks == 0 {
            return Err(Error::config("Number of blocks must be greater than 0"));
        }
        if self.workload == 0 {
            return Err(Error::config("Workload must be greater than 0"));
        }
        if self.difficulty > Difficulty::MAX {
            return Err(Error::config(format!(
                "Difficulty must be at most {} hex digits",
                Difficulty::MAX
            )));
        }
        if self.progress_interval == 0 {
            return Err(Error::config("Progress interval must be greater than 0"));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("Chunk size must be greater than 0"));
        }
        if self.timeout_duration()?.is_zero() {
            return Err(Error::config("Timeout must be greater than 0"));
        }
        Ok(())
    }

    /// Number of workers, resolving 0 to the number of CPUs
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    /// Get the session deadline
    pub fn timeout_duration(&self) -> Result<Duration> {
        humantime::parse_duration(&self.timeout)
            .map_err(|e| Error::config(format!("Invalid timeout '{}': {}", self.timeout, e)))
    }

    /// Get progress interval duration
    pub fn progress_interval_duration(&self) -> Duration {
        Duration::from_secs(self.progress_interval)
    }

    /// Build the work order for a mining session
    pub fn work_order(&self) -> Result<WorkOrder> {
        WorkOrder::new(
            self.blocks,
            self.worker_count(),
            self.workload,
            self.difficulty,
            self.progress_interval_duration(),
        )
    }

    /// Get coordinator options
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            chunk_size: self.chunk_size,
            replace_lost_workers: !self.no_worker_replacement,
            max_worker_restarts: self.max_worker_restarts,
        }
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }
}

// Default value functions for serde
fn default_blocks() -> usize { 10 }
fn default_workload() -> u64 { 1_000_000 }
fn default_difficulty() -> u32 { 5 }
fn default_progress_interval() -> u64 { 1 }
fn default_timeout() -> String { "1h".to_string() }
fn default_chunk_size() -> u64 { 1_000 }
fn default_max_worker_restarts() -> u32 { 10 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
