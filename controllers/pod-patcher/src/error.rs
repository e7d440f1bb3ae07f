//! Binary-specific error types.
//!
//! Wraps the library errors with the failures that only happen while
//! starting up: reading the desired-state document and connecting.

use pod_patch::PatchError;
use thiserror::Error;
use workload_client::ClientError;

/// Errors that can occur while running the patcher.
#[derive(Debug, Error)]
pub enum PatcherError {
    /// Reconciliation error
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Kubernetes client could not be created
    #[error("Kubernetes client error: {0}")]
    Client(#[from] ClientError),

    /// Desired-state document could not be read
    #[error("Cannot read desired state from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Desired-state document is not valid YAML for the expected shape
    #[error("Invalid desired state in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
