use std::time;

use quake_common::store::StoreError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors fetching a batch from the event feed. Any of them aborts the current cycle, and the
/// same window is fetched again next cycle.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed request timed out after {0:?}")]
    Timeout(time::Duration),
    #[error("feed request failed: {0}")]
    Network(reqwest::Error),
    #[error("feed responded with {0}")]
    Service(StatusCode),
    #[error("feed response could not be decoded: {0}")]
    MalformedResponse(String),
}

impl FeedError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Timeout(_) => "timeout",
            FeedError::Network(_) => "network",
            FeedError::Service(_) | FeedError::MalformedResponse(_) => "service",
        }
    }
}

/// A single raw record that could not be normalized. Only that record is dropped.
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("record has an empty id")]
    EmptyId,
    #[error("record {id} has an invalid timestamp: {value:?}")]
    InvalidTimestamp { id: String, value: String },
    #[error("record {id} has an invalid {field}: {value}")]
    InvalidNumber {
        id: String,
        field: &'static str,
        value: String,
    },
}

/// Errors resolving coordinates to a place name. None of them is ever written to the cache.
#[derive(Error, Debug)]
pub enum LocationError {
    #[error("geocoding request timed out after {0:?}")]
    Timeout(time::Duration),
    #[error("geocoding request failed: {0}")]
    Network(reqwest::Error),
    #[error("geocoder responded with {0}")]
    Service(StatusCode),
    #[error("geocoder response is unusable: {0}")]
    MalformedResponse(String),
    #[error("location cache lookup failed: {0}")]
    Cache(#[from] StoreError),
}

impl LocationError {
    pub fn kind(&self) -> &'static str {
        match self {
            LocationError::Timeout(_) => "timeout",
            LocationError::Network(_) => "network",
            LocationError::Service(_) | LocationError::MalformedResponse(_) => "service",
            LocationError::Cache(_) => "storage",
        }
    }
}

/// Errors that stop the worker from starting.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("a storage error occurred: {0}")]
    StoreError(#[from] StoreError),
    #[error("failed to run migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("failed to build http client: {0}")]
    ClientError(reqwest::Error),
    #[error("failed to install metrics recorder: {0}")]
    MetricsError(#[from] metrics_exporter_prometheus::BuildError),
}
