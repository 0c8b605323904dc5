use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A single raw input unit (one CSV row or one live payload) could not be normalized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("Column {column} is not numeric: {value:?}")]
    InvalidNumber { column: &'static str, value: String },
    #[error("Invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
    #[error("Invalid measurement payload: {0}")]
    InvalidPayload(String),
}

/// Errors reported by a time-series backend implementation.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend is unreachable: {0}")]
    Connectivity(String),
    #[error("Backend request failed: {0}")]
    Request(String),
    #[error("Point could not be encoded: {0}")]
    InvalidPoint(String),
    #[error("Unexpected query response: {0}")]
    UnexpectedResponse(String),
}

/// One batch failed to persist. Later batches are still attempted.
#[derive(Error, Debug)]
#[error("Batch {batch_index} ({size} records) failed to write: {source}")]
pub struct BatchWriteError {
    pub batch_index: usize,
    pub size: usize,
    #[source]
    pub source: BackendError,
}

/// Reachability probe outcomes other than a reply.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe of {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
    #[error("Probe of {host} failed: {reason}")]
    Unreachable { host: String, reason: String },
    #[error(
        "Could not open ICMP socket (grant CAP_NET_RAW or widen net.ipv4.ping_group_range): {0}"
    )]
    Socket(#[source] std::io::Error),
}

/// The external measurement process did not produce a usable result.
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("Measurement timed out after {0:?}")]
    Timeout(Duration),
    #[error("Failed to spawn measurement command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Measurement command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors that abort a single poller iteration and trigger the cooldown.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Reachability probe could not run: {0}")]
    Probe(#[from] ProbeError),
}

/// Errors that end an import run.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("No CSV files found matching: {0}")]
    NoFilesFound(String),
    #[error("Invalid input pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Failed to read {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Configuration could not be assembled from file and environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Process-fatal startup failures.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to connect to InfluxDB: {0}")]
    Connectivity(#[source] BackendError),
    #[error(transparent)]
    Import(#[from] ImportError),
}
