//! Error taxonomy for the migration run.
//!
//! `ClusterError` is what a single HTTP call can produce. `MigrateError` is the
//! set of fatal, run-level conditions; per-index failures never reach it and are
//! folded into a `MigrationOutcome` instead.

use std::time::Duration;

use reqwest::Method;
use thiserror::Error;

/// Failure of a single call against the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{method} {path} failed: {source}")]
    Transport {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: Method,
        path: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl ClusterError {
    /// HTTP status of the response, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClusterError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Why a poll loop stopped without its condition being met.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("gave up waiting for {condition} after {waited:?}")]
    Timeout { condition: String, waited: Duration },

    #[error("wait for {condition} was cancelled")]
    Cancelled { condition: String },
}

/// Conditions that abort the whole run.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("snapshot repository {name} is missing and could not be created: {source}")]
    Repository {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("restore of snapshot {snapshot} was rejected: {source}")]
    RestoreRejected {
        snapshot: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to list staging indices matching {pattern}: {source}")]
    Discovery {
        pattern: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl MigrateError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrateError::Wait(WaitError::Cancelled { .. }))
    }
}
