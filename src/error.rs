//! Error types
//!
//!  Absence of data is never an error here: unknown aircraft, missing runways
//!  and disabled datasets come back as `None`/`NoMatch`/empty results. These
//!  types cover malformed input and caller misuse.

use std::path::PathBuf;

/// Why a position report was refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportError {
    #[error("report has an empty aircraft id")]
    EmptyId,
    #[error("timestamp {0} ms out of range")]
    Timestamp(i64),
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("latitude {0} out of range")]
    Latitude(f64),
    #[error("longitude {0} out of range")]
    Longitude(f64),
    #[error("negative ground speed {0}")]
    NegativeSpeed(f64),
}

/// Airport index failures
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dataset {} is not readable: {source}", path.display())]
    Dataset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid radius {0}")]
    InvalidRadius(f64),
}

/// Runway worker pool submission failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("runway request queue is full")]
    QueueFull,
    #[error("runway worker pool is not running")]
    Closed,
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid engine config: {0}")]
    Json(#[from] serde_json::Error),
}
