//! WorkloadClient trait for mocking
//!
//! This trait abstracts the Kubernetes calls the reconcilers make so that
//! reconciliation can be exercised against an in-memory cluster in unit tests.
//! The concrete `WorkloadClient` implements it on top of `kube::Api`.

use crate::error::ClientError;
use crds::NetworkAttachmentDefinition;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

/// Trait for the Kubernetes operations used by the reconcilers
///
/// All calls are scoped to the namespace the client was created for.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait WorkloadClientTrait: Send + Sync {
    /// Namespace every call is scoped to
    fn namespace(&self) -> &str;

    // Workloads
    async fn get_statefulset(&self, name: &str) -> Result<StatefulSet, ClientError>;
    /// Full replace; the server rejects it with `Conflict` when
    /// `metadata.resourceVersion` is stale.
    async fn replace_statefulset(&self, name: &str, statefulset: &StatefulSet) -> Result<StatefulSet, ClientError>;
    async fn get_pod(&self, name: &str) -> Result<Pod, ClientError>;

    // NetworkAttachmentDefinitions
    async fn list_network_attachment_definitions(&self, label_selector: &str) -> Result<Vec<NetworkAttachmentDefinition>, ClientError>;
    async fn get_network_attachment_definition(&self, name: &str) -> Result<NetworkAttachmentDefinition, ClientError>;
    async fn create_network_attachment_definition(&self, definition: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition, ClientError>;
    async fn replace_network_attachment_definition(&self, name: &str, definition: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition, ClientError>;
    /// Delete, optionally guarded by a resourceVersion precondition.
    async fn delete_network_attachment_definition(&self, name: &str, resource_version: Option<&str>) -> Result<(), ClientError>;
}
