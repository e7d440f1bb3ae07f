//! Multus reconciler.

use super::attachments::{self, AttachmentOp};
use super::network::{self, MultusDesired, MultusOwnership, NETWORKS_ANNOTATION, NetworkInterfaceSpec};
use crate::apply::{ApplyOutcome, apply_fragment};
use crate::config::ReconcilerConfig;
use crate::error::PatchError;
use crate::merge::merge_template;
use crate::reader::{read_owned_attachments, read_statefulset};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use workload_client::{ClientError, WorkloadClientTrait};

/// Attaches secondary networks to an application's Pods.
///
/// Owns the `k8s.v1.cni.cncf.io/networks` annotation of the StatefulSet Pod
/// template, the NetworkAttachmentDefinitions labelled as created by the
/// application, and `NET_ADMIN` on the listed containers.
pub struct KubernetesMultus {
    client: Arc<dyn WorkloadClientTrait>,
    config: ReconcilerConfig,
    interfaces: Vec<NetworkInterfaceSpec>,
    net_admin_containers: Vec<String>,
}

impl std::fmt::Debug for KubernetesMultus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesMultus")
            .field("namespace", &self.client.namespace())
            .field("app_name", &self.config.app_name)
            .field("interfaces", &self.interfaces)
            .field("net_admin_containers", &self.net_admin_containers)
            .finish_non_exhaustive()
    }
}

impl KubernetesMultus {
    /// Reconciler for `config.app_name` with the requested interfaces.
    pub fn new(
        client: Arc<dyn WorkloadClientTrait>,
        config: ReconcilerConfig,
        interfaces: Vec<NetworkInterfaceSpec>,
        net_admin_containers: Vec<String>,
    ) -> Self {
        Self {
            client,
            config,
            interfaces,
            net_admin_containers,
        }
    }

    /// Requested interfaces
    pub fn interfaces(&self) -> &[NetworkInterfaceSpec] {
        &self.interfaces
    }

    fn desired(&self) -> Result<MultusDesired, PatchError> {
        network::build(&self.interfaces, &self.net_admin_containers)
    }

    /// Converge the cluster on the requested interfaces.
    ///
    /// Definitions are created and updated before the Pod template is
    /// patched. Definitions the live template still references are deleted
    /// only after the patch lands; when the live annotation cannot be read,
    /// every orphan is treated as referenced. Definition failures do not stop
    /// the others and are reported together as `PartialReconcile`. If the
    /// patch itself then fails, it is listed as `StatefulSet/<app>` next to
    /// them; on its own its error is returned as is.
    pub async fn reconcile(&self) -> Result<(), PatchError> {
        let client = self.client.as_ref();
        let app_name = self.config.app_name.as_str();
        let desired = self.desired()?;

        let live = read_statefulset(client, app_name).await?;
        let template = live.template()?;
        // Surfaces missing containers before any definition is written
        merge_template(app_name, template, &desired.fragment, &MultusOwnership)?;

        let owned = read_owned_attachments(client, app_name).await?;
        let live_value = template
            .metadata
            .as_ref()
            .and_then(|meta| meta.annotations.as_ref())
            .and_then(|annotations| annotations.get(NETWORKS_ANNOTATION));
        let live_references = match live_value.map(|value| network::referenced_attachments(value)) {
            None => BTreeSet::new(),
            Some(Some(names)) => names,
            Some(None) => {
                warn!(
                    "Cannot read {} on StatefulSet {}, deferring deletion of owned NetworkAttachmentDefinitions",
                    NETWORKS_ANNOTATION, app_name
                );
                owned.keys().cloned().collect()
            }
        };
        let plan = attachments::plan(&desired.attachments, &desired.referenced, &owned, &live_references);
        if plan.is_empty() {
            debug!("NetworkAttachmentDefinitions of {} are up to date", app_name);
        } else if !plan.after.is_empty() {
            debug!(
                "Deferring deletion of {} NetworkAttachmentDefinitions until {} stops referencing them",
                plan.after.len(),
                app_name
            );
        }

        let mut failures = attachments::execute(client, app_name, &plan.before, &self.config.retry).await;

        let missing: BTreeSet<&str> = plan
            .before
            .iter()
            .filter(|op| matches!(op, AttachmentOp::Create { .. }))
            .map(AttachmentOp::name)
            .filter(|name| failures.iter().any(|(failed, _)| failed == name))
            .collect();
        if !missing.is_empty() {
            warn!(
                "Not patching StatefulSet {}: NetworkAttachmentDefinitions {:?} could not be created",
                app_name, missing
            );
            return attachments::into_partial(failures);
        }

        match apply_fragment(client, app_name, &desired.fragment, &MultusOwnership, &self.config.retry).await {
            Ok(ApplyOutcome::Applied { attempts }) => info!(
                "Set {} network interfaces on StatefulSet {} after {} attempt(s)",
                self.interfaces.len(),
                app_name,
                attempts
            ),
            Ok(ApplyOutcome::Unchanged) => {}
            Err(e) if failures.is_empty() => return Err(e),
            Err(e) => {
                failures.push((format!("StatefulSet/{app_name}"), e));
                return attachments::into_partial(failures);
            }
        }

        failures.extend(attachments::execute(client, app_name, &plan.after, &self.config.retry).await);
        attachments::into_partial(failures)
    }

    /// Whether the owned definitions and the Pod template match the request.
    ///
    /// An `Unauthorized` API response is treated as "not configured yet".
    pub async fn is_configured(&self) -> Result<bool, PatchError> {
        match self.check_configured().await {
            Err(PatchError::Apply {
                source: ClientError::Unauthorized(_),
                ..
            }) => {
                debug!("Unauthorized while checking {}, reporting not configured", self.config.app_name);
                Ok(false)
            }
            other => other,
        }
    }

    async fn check_configured(&self) -> Result<bool, PatchError> {
        let client = self.client.as_ref();
        let app_name = self.config.app_name.as_str();
        let desired = self.desired()?;

        let owned = read_owned_attachments(client, app_name).await?;
        for (name, config) in &desired.attachments {
            if !owned.get(name).is_some_and(|definition| definition.config_matches(config)) {
                debug!("NetworkAttachmentDefinition {} is missing or outdated", name);
                return Ok(false);
            }
        }

        let live = read_statefulset(client, app_name).await?;
        let merged = merge_template(app_name, live.template()?, &desired.fragment, &MultusOwnership)?;
        Ok(!merged.changed)
    }

    /// Delete every definition owned by the application.
    ///
    /// The Pod template is left as is; it is expected to go away with the
    /// application.
    pub async fn remove(&self) -> Result<(), PatchError> {
        let client = self.client.as_ref();
        let app_name = self.config.app_name.as_str();
        let owned = read_owned_attachments(client, app_name).await?;
        let ops: Vec<AttachmentOp> = owned
            .into_keys()
            .map(|name| AttachmentOp::Delete { name })
            .collect();
        info!("Removing {} NetworkAttachmentDefinitions owned by {}", ops.len(), app_name);
        let failures = attachments::execute(client, app_name, &ops, &self.config.retry).await;
        attachments::into_partial(failures)
    }
}
