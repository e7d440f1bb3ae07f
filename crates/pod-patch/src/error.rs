//! Reconciliation error types.
//!
//! Every failure is returned to the caller; nothing is retried in-process
//! except the bounded optimistic-concurrency retry in `apply`.

use thiserror::Error;
use workload_client::ClientError;

/// Errors surfaced by a reconciliation call.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Desired state is malformed; the caller must fix its configuration
    #[error("Invalid desired state: {0}")]
    InvalidSpec(String),

    /// Target object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// A container named in the request is absent from the Pod template
    #[error("Container {container} not found in StatefulSet {statefulset}")]
    ContainerNotFound {
        /// StatefulSet name
        statefulset: String,
        /// Missing container name
        container: String,
    },

    /// Conflict retry budget exhausted
    #[error("{kind} {name} was modified concurrently, gave up after {attempts} attempts")]
    ConcurrentModification {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// Attempts made
        attempts: u32,
    },

    /// Any other API failure
    #[error("Could not apply {kind} {name}: {source}")]
    Apply {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },

    /// Some resources failed; the rest were reconciled
    #[error("Failed to reconcile {}", .failed.join(", "))]
    PartialReconcile {
        /// Names of the resources that failed
        failed: Vec<String>,
        /// Failure per resource, in the same order as `failed`
        errors: Vec<PatchError>,
    },
}

impl PatchError {
    /// Map a client error on `kind`/`name`, turning 404 into `NotFound`.
    pub(crate) fn from_client(kind: &'static str, name: &str, source: ClientError) -> Self {
        match source {
            ClientError::NotFound(_) => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            source => Self::Apply {
                kind,
                name: name.to_string(),
                source,
            },
        }
    }

    /// HTTP status of the underlying API failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Apply { source, .. } => source.status_code(),
            Self::NotFound { .. } => Some(404),
            Self::ConcurrentModification { .. } => Some(409),
            _ => None,
        }
    }

    /// Whether re-triggering the reconciliation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } | Self::PartialReconcile { .. } => true,
            Self::Apply { source, .. } => matches!(
                source,
                ClientError::Unauthorized(_) | ClientError::Kube(_)
            ),
            Self::InvalidSpec(_) | Self::NotFound { .. } | Self::ContainerNotFound { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_mapped() {
        let err = PatchError::from_client("StatefulSet", "upf", ClientError::NotFound("x".into()));
        assert!(matches!(err, PatchError::NotFound { kind: "StatefulSet", .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_apply_error_exposes_status_code() {
        let err = PatchError::from_client(
            "StatefulSet",
            "upf",
            ClientError::Api {
                code: 403,
                reason: "Forbidden".into(),
                message: "no".into(),
            },
        );
        assert_eq!(err.status_code(), Some(403));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_partial_reconcile_lists_names() {
        let err = PatchError::PartialReconcile {
            failed: vec!["a".into(), "b".into()],
            errors: vec![PatchError::InvalidSpec("x".into()), PatchError::InvalidSpec("y".into())],
        };
        assert!(err.to_string().contains("a, b"));
        assert!(err.is_retryable());
    }
}
