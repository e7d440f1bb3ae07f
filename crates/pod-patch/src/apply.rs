//! Applier.
//!
//! Commits a merged Pod template with a full StatefulSet replace guarded by
//! the resourceVersion read in the same attempt. Conflicts run the bounded
//! loop Read -> Merge -> Apply again; any other failure ends the loop.

use crate::backoff::RetryPolicy;
use crate::error::PatchError;
use crate::merge::{Merged, Ownership, PatchFragment, merge_template};
use crate::reader::{LiveWorkload, read_statefulset};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use std::future::Future;
use tracing::{debug, info, warn};
use workload_client::{ClientError, WorkloadClientTrait};

/// What `apply_fragment` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Owned state already matched, nothing was written
    Unchanged,
    /// The StatefulSet was replaced
    Applied {
        /// Replace attempts made, the successful one included
        attempts: u32,
    },
}

impl ApplyOutcome {
    /// Whether a write happened
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Replace the StatefulSet with the merged template, conditioned on the
/// resourceVersion captured in `live`. A merge that changed nothing is a no-op.
pub async fn apply<C>(client: &C, live: &LiveWorkload, merged: Merged<PodTemplateSpec>) -> Result<(), ClientError>
where
    C: WorkloadClientTrait + ?Sized,
{
    if !merged.changed {
        return Ok(());
    }
    let name = live.name();
    client.replace_statefulset(&name, &live.with_template(merged.value)).await?;
    Ok(())
}

/// Run `attempt` until it succeeds, fails with something other than a
/// conflict, or the policy's attempts are used up.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    kind: &'static str,
    name: &str,
    mut attempt: F,
) -> Result<T, PatchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PatchError>>,
{
    let attempts = policy.attempts();
    let mut backoff = policy.backoff();
    for current in 1..=attempts {
        match attempt(current).await {
            Err(PatchError::Apply { source, .. }) if source.is_conflict() => {
                warn!("{} {} modified concurrently (attempt {}/{})", kind, name, current, attempts);
                if current < attempts {
                    tokio::time::sleep(backoff.next_jittered()).await;
                }
            }
            other => return other,
        }
    }
    Err(PatchError::ConcurrentModification {
        kind,
        name: name.to_string(),
        attempts,
    })
}

/// Read the StatefulSet, merge `desired` into its template and apply the
/// result, retrying on conflict.
pub async fn apply_fragment<C>(
    client: &C,
    name: &str,
    desired: &PatchFragment,
    ownership: &impl Ownership,
    policy: &RetryPolicy,
) -> Result<ApplyOutcome, PatchError>
where
    C: WorkloadClientTrait + ?Sized,
{
    retry_on_conflict(policy, "StatefulSet", name, |attempt| async move {
        let live = read_statefulset(client, name).await?;
        let merged = merge_template(name, live.template()?, desired, ownership)?;
        if !merged.changed {
            debug!("StatefulSet {} already up-to-date", name);
            return Ok(ApplyOutcome::Unchanged);
        }
        apply(client, &live, merged)
            .await
            .map_err(|e| PatchError::from_client("StatefulSet", name, e))?;
        info!("Patched StatefulSet {}/{}", client.namespace(), name);
        Ok(ApplyOutcome::Applied { attempts: attempt })
    })
    .await
}
