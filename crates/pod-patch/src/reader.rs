//! Live-state reader.
//!
//! Fetches the objects a reconciliation works from. Nothing is cached: every
//! call (and every retry) reads the cluster again.

use crate::error::PatchError;
use crds::NetworkAttachmentDefinition;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;
use workload_client::WorkloadClientTrait;

/// A StatefulSet as read, with its concurrency token.
#[derive(Debug, Clone)]
pub struct LiveWorkload {
    /// The object as returned by the API server
    pub statefulset: StatefulSet,
    /// `metadata.resourceVersion` at read time
    pub resource_version: Option<String>,
}

impl LiveWorkload {
    /// StatefulSet name
    pub fn name(&self) -> String {
        self.statefulset.name_any()
    }

    /// The Pod template being patched
    pub fn template(&self) -> Result<&PodTemplateSpec, PatchError> {
        self.statefulset
            .spec
            .as_ref()
            .map(|spec| &spec.template)
            .ok_or_else(|| PatchError::InvalidSpec(format!("StatefulSet {} has no spec", self.name())))
    }

    /// Copy of the StatefulSet with `template` swapped in, carrying the read resourceVersion
    pub fn with_template(&self, template: PodTemplateSpec) -> StatefulSet {
        let mut statefulset = self.statefulset.clone();
        statefulset.metadata.resource_version.clone_from(&self.resource_version);
        if let Some(spec) = statefulset.spec.as_mut() {
            spec.template = template;
        }
        statefulset
    }
}

/// Read the named StatefulSet. Absence is `PatchError::NotFound`.
pub async fn read_statefulset<C>(client: &C, name: &str) -> Result<LiveWorkload, PatchError>
where
    C: WorkloadClientTrait + ?Sized,
{
    let statefulset = client
        .get_statefulset(name)
        .await
        .map_err(|e| PatchError::from_client("StatefulSet", name, e))?;
    let resource_version = statefulset.metadata.resource_version.clone();
    debug!(
        "Read StatefulSet {}/{} at resourceVersion {:?}",
        client.namespace(),
        name,
        resource_version
    );
    Ok(LiveWorkload {
        statefulset,
        resource_version,
    })
}

/// List the NetworkAttachmentDefinitions owned by `app_name`, keyed by name.
pub async fn read_owned_attachments<C>(
    client: &C,
    app_name: &str,
) -> Result<BTreeMap<String, NetworkAttachmentDefinition>, PatchError>
where
    C: WorkloadClientTrait + ?Sized,
{
    let selector = NetworkAttachmentDefinition::owner_selector(app_name);
    let listed = client
        .list_network_attachment_definitions(&selector)
        .await
        .map_err(|e| PatchError::from_client("NetworkAttachmentDefinition", &selector, e))?;
    let owned: BTreeMap<_, _> = listed
        .into_iter()
        .filter(|definition| definition.is_owned_by(app_name))
        .map(|definition| (definition.name_any(), definition))
        .collect();
    debug!(
        "Found {} NetworkAttachmentDefinitions owned by {} in {}",
        owned.len(),
        app_name,
        client.namespace()
    );
    Ok(owned)
}
