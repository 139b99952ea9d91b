//! Error taxonomy for the fleet controller.
//!
//! Only run-level faults live here. Node-scoped failures never leave the
//! per-node task; they are flattened into `NodeSummary::error` instead.

use thiserror::Error;

/// Fatal configuration problems, detected before any polling starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read fleet config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid node #{index} ({name}): {reason}")]
    InvalidNode {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("invalid fleet config: {0}")]
    Invalid(String),

    #[error("cannot determine home directory for default paths")]
    NoHomeDir,
}

/// Faults that end a run in the failed state.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("audit store unavailable: {0}")]
    AuditStore(#[source] rusqlite::Error),

    #[error("poll task for node '{node}' aborted: {source}")]
    TaskAborted {
        node: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

pub type Result<T, E = FleetError> = std::result::Result<T, E>;
