use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::coordinator::RunStage;

/// Failure to retrieve the listing page. Retried by the next trigger, never within a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("fetching {url} timed out after {}s", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    #[error("browser failed to render {url}: {reason}")]
    Render { url: String, reason: String },
}

/// The page no longer has the structure the extractor expects.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no listing elements found in page ({bytes} bytes)")]
    StructureMissing { bytes: usize },

    #[error("{rows} listing rows found but none had an apartment identifier")]
    NoIdentifiableListings { rows: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address {address:?}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Any stage failure inside a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("run exceeded {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("run task aborted: {0}")]
    Aborted(String),
}

/// A run that ended in the `Failed` state.
#[derive(Debug, Error)]
#[error("run failed while {stage}: {source}")]
pub struct RunError {
    pub stage: RunStage,
    #[source]
    pub source: PipelineError,
    pub snapshot_updated: bool,
}
