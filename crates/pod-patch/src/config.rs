//! Reconciler configuration.
//!
//! Identifies the workload being patched and tunes the conflict retry.
//! Inside a Juju hook the identity comes from the hook environment.

use crate::backoff::RetryPolicy;
use crate::error::PatchError;
use std::env;
use std::time::Duration;

/// Default field manager recorded on every write
pub const DEFAULT_FIELD_MANAGER: &str = "pod-patch";

/// Identity of the workload and the retry behaviour used when patching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Namespace holding the StatefulSet (the Juju model name)
    pub namespace: String,
    /// Application name; also the StatefulSet name and the NAD owner
    pub app_name: String,
    /// Unit name (`app/N`), when running inside a unit
    pub unit_name: Option<String>,
    /// Field manager recorded on writes
    pub field_manager: String,
    /// Conflict retry policy
    pub retry: RetryPolicy,
}

impl ReconcilerConfig {
    /// Configuration with default retry policy and field manager
    pub fn new(namespace: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            app_name: app_name.into(),
            unit_name: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load configuration from the Juju hook environment
    ///
    /// * `JUJU_MODEL_NAME` - namespace (required)
    /// * `JUJU_UNIT_NAME` - unit name `app/N` (required)
    /// * `POD_PATCH_MAX_ATTEMPTS` - conflict retry attempts (optional)
    /// * `POD_PATCH_BACKOFF_MS` - first retry delay in milliseconds (optional)
    pub fn from_env() -> Result<Self, PatchError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PatchError> {
        let namespace = lookup("JUJU_MODEL_NAME").ok_or_else(|| {
            PatchError::InvalidSpec("JUJU_MODEL_NAME environment variable is required".to_string())
        })?;
        let unit_name = lookup("JUJU_UNIT_NAME").ok_or_else(|| {
            PatchError::InvalidSpec("JUJU_UNIT_NAME environment variable is required".to_string())
        })?;
        let app_name = match unit_name.rsplit_once('/') {
            Some((app, number)) if !app.is_empty() && number.parse::<u32>().is_ok() => app.to_string(),
            _ => {
                return Err(PatchError::InvalidSpec(format!(
                    "JUJU_UNIT_NAME must look like app/N, got {unit_name}"
                )));
            }
        };

        let mut config = Self::new(namespace, app_name);
        config.unit_name = Some(unit_name);

        if let Some(raw) = lookup("POD_PATCH_MAX_ATTEMPTS") {
            config.retry.max_attempts = raw
                .parse::<u32>()
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or_else(|| PatchError::InvalidSpec(format!("Invalid POD_PATCH_MAX_ATTEMPTS: {raw}")))?;
        }
        if let Some(raw) = lookup("POD_PATCH_BACKOFF_MS") {
            let millis = raw
                .parse::<u64>()
                .map_err(|e| PatchError::InvalidSpec(format!("Invalid POD_PATCH_BACKOFF_MS {raw}: {e}")))?;
            config.retry.base_delay = Duration::from_millis(millis);
            config.retry.max_delay = config.retry.max_delay.max(config.retry.base_delay);
        }
        Ok(config)
    }

    /// Name of the unit's Pod (`app/0` becomes `app-0`)
    pub fn pod_name(&self) -> Option<String> {
        self.unit_name
            .as_deref()
            .and_then(|unit| unit.rsplit_once('/'))
            .map(|(app, number)| format!("{app}-{number}"))
    }
}
