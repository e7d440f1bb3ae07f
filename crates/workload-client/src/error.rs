//! Kubernetes client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClientError {
    /// Object does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed (HTTP 409, stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create collided with an existing object (HTTP 409, AlreadyExists)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credentials rejected, usually while the API server is still starting (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The resource kind itself is not served by the cluster
    #[error("Resource type {0} is not served by the cluster, you may need to install Multus CNI")]
    ResourceTypeMissing(String),

    /// Any other status returned by the API server
    #[error("Kubernetes API error {code} ({reason}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Machine readable reason
        reason: String,
        /// Human readable message
        message: String,
    },

    /// Transport or client-side error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl ClientError {
    /// Classify a `kube::Error` returned for the object `what`.
    pub fn from_kube(error: kube::Error, what: &str) -> Self {
        match error {
            kube::Error::Api(response) => match response.code {
                401 => Self::Unauthorized(what.to_string()),
                404 => Self::NotFound(what.to_string()),
                409 if response.reason == "AlreadyExists" => Self::AlreadyExists(what.to_string()),
                409 => Self::Conflict(what.to_string()),
                code => Self::Api {
                    code,
                    reason: response.reason,
                    message: response.message,
                },
            },
            other => Self::Kube(other),
        }
    }

    /// HTTP status code, when the error came from the API server.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound(_) | Self::ResourceTypeMissing(_) => Some(404),
            Self::Conflict(_) | Self::AlreadyExists(_) => Some(409),
            Self::Unauthorized(_) => Some(401),
            Self::Api { code, .. } => Some(*code),
            Self::Kube(kube::Error::Api(response)) => Some(response.code),
            Self::Kube(_) => None,
        }
    }

    /// Whether the error is an optimistic-concurrency conflict worth retrying.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Kube(kube::Error::Api(response)) => response.code == 409 && response.reason != "AlreadyExists",
            _ => false,
        }
    }
}
