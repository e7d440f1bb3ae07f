//! HugePages reconciler.

use super::request::{self, HugePageRequest, HugePagesOwnership};
use crate::apply::{ApplyOutcome, apply_fragment};
use crate::config::ReconcilerConfig;
use crate::error::PatchError;
use crate::merge::{ContainerFragment, Ownership, PatchFragment, merge_template};
use crate::reader::read_statefulset;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use workload_client::{ClientError, WorkloadClientTrait};

/// Reserves HugePages for an application's containers.
///
/// Owns the `hugepages-` prefixed volumes of the StatefulSet Pod template
/// and the matching volume mounts and resource limits/requests of its
/// containers.
pub struct KubernetesHugePages {
    client: Arc<dyn WorkloadClientTrait>,
    config: ReconcilerConfig,
    requests: Vec<HugePageRequest>,
    containers: Vec<String>,
}

impl std::fmt::Debug for KubernetesHugePages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesHugePages")
            .field("namespace", &self.client.namespace())
            .field("app_name", &self.config.app_name)
            .field("requests", &self.requests)
            .field("containers", &self.containers)
            .finish_non_exhaustive()
    }
}

fn unauthorized_is_false(result: Result<bool, PatchError>, what: &str) -> Result<bool, PatchError> {
    match result {
        Err(PatchError::Apply {
            source: ClientError::Unauthorized(_),
            ..
        }) => {
            debug!("Unauthorized while checking {}, reporting not patched", what);
            Ok(false)
        }
        other => other,
    }
}

impl KubernetesHugePages {
    /// Reconciler reserving `requests` in each of `containers`.
    pub fn new(
        client: Arc<dyn WorkloadClientTrait>,
        config: ReconcilerConfig,
        requests: Vec<HugePageRequest>,
        containers: Vec<String>,
    ) -> Self {
        Self {
            client,
            config,
            requests,
            containers,
        }
    }

    /// Requested HugePages
    pub fn requests(&self) -> &[HugePageRequest] {
        &self.requests
    }

    fn desired(&self) -> Result<PatchFragment, PatchError> {
        request::build(&self.requests, &self.containers)
    }

    /// Patch the StatefulSet Pod template with the requested HugePages.
    pub async fn reconcile(&self) -> Result<(), PatchError> {
        let app_name = self.config.app_name.as_str();
        let desired = self.desired()?;
        let outcome = apply_fragment(
            self.client.as_ref(),
            app_name,
            &desired,
            &HugePagesOwnership,
            &self.config.retry,
        )
        .await?;
        if let ApplyOutcome::Applied { attempts } = outcome {
            info!(
                "Set {} HugePages volumes on StatefulSet {} after {} attempt(s)",
                self.requests.len(),
                app_name,
                attempts
            );
        }
        Ok(())
    }

    /// Whether the StatefulSet Pod template already matches the request.
    ///
    /// An `Unauthorized` API response is treated as "not patched yet".
    pub async fn is_patched(&self) -> Result<bool, PatchError> {
        unauthorized_is_false(self.check_template().await, &self.config.app_name)
    }

    async fn check_template(&self) -> Result<bool, PatchError> {
        let app_name = self.config.app_name.as_str();
        let desired = self.desired()?;
        let live = read_statefulset(self.client.as_ref(), app_name).await?;
        let merged = merge_template(app_name, live.template()?, &desired, &HugePagesOwnership)?;
        Ok(!merged.changed)
    }

    /// Whether the running Pod's target containers carry the requested
    /// mounts and resources, i.e. the patched template has rolled out.
    pub async fn pod_is_patched(&self, pod_name: &str) -> Result<bool, PatchError> {
        unauthorized_is_false(self.check_pod(pod_name).await, pod_name)
    }

    async fn check_pod(&self, pod_name: &str) -> Result<bool, PatchError> {
        let desired = self.desired()?;
        let pod = self
            .client
            .get_pod(pod_name)
            .await
            .map_err(|e| PatchError::from_client("Pod", pod_name, e))?;
        let containers = pod.spec.map(|spec| spec.containers).unwrap_or_default();
        for (name, fragment) in &desired.containers {
            let Some(container) = containers.iter().find(|c| &c.name == name) else {
                debug!("Container {} not found in Pod {}", name, pod_name);
                return Ok(false);
            };
            if !container_has(container, fragment) {
                debug!("Container {} of Pod {} is not patched yet", name, pod_name);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `pod_is_patched` for this unit's own Pod.
    pub async fn unit_pod_is_patched(&self) -> Result<bool, PatchError> {
        let pod_name = self
            .config
            .pod_name()
            .ok_or_else(|| PatchError::InvalidSpec("Unit name is not configured".to_string()))?;
        self.pod_is_patched(&pod_name).await
    }
}

fn container_has(container: &Container, fragment: &ContainerFragment) -> bool {
    let mounts = container.volume_mounts.as_deref().unwrap_or_default();
    let mounted = fragment.volume_mounts.iter().all(|wanted| {
        mounts
            .iter()
            .any(|m| m.name == wanted.name && m.mount_path == wanted.mount_path)
    });

    let resources = container.resources.as_ref();
    mounted
        && has_quantities(resources.and_then(|r| r.limits.as_ref()), &fragment.limits)
        && has_quantities(resources.and_then(|r| r.requests.as_ref()), &fragment.requests)
}

fn has_quantities(live: Option<&BTreeMap<String, Quantity>>, wanted: &BTreeMap<String, Quantity>) -> bool {
    wanted.iter().all(|(name, quantity)| {
        live.and_then(|map| map.get(name))
            .is_some_and(|q| &HugePagesOwnership.canonical_quantity(name, q) == quantity)
    })
}
