//! Kubernetes API client
//!
//! Implements `WorkloadClientTrait` on top of `kube::Api` for StatefulSets,
//! Pods and NetworkAttachmentDefinitions in a single namespace.

use crate::error::ClientError;
use crate::workload_trait::WorkloadClientTrait;
use crds::NetworkAttachmentDefinition;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, PostParams, Preconditions};
use kube::{Api, Client};
use tracing::debug;

/// Kubernetes client scoped to one namespace
#[derive(Clone)]
pub struct WorkloadClient {
    namespace: String,
    field_manager: String,
    statefulsets: Api<StatefulSet>,
    pods: Api<Pod>,
    attachments: Api<NetworkAttachmentDefinition>,
}

impl std::fmt::Debug for WorkloadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadClient")
            .field("namespace", &self.namespace)
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl WorkloadClient {
    /// Create a client from an existing `kube::Client`
    ///
    /// # Arguments
    /// * `client` - Authenticated Kubernetes client
    /// * `namespace` - Namespace every call is scoped to
    /// * `field_manager` - Field manager recorded on writes
    pub fn new(client: Client, namespace: &str, field_manager: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            field_manager: field_manager.to_string(),
            statefulsets: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client.clone(), namespace),
            attachments: Api::namespaced(client, namespace),
        }
    }

    /// Create a client from the in-cluster or kubeconfig environment
    pub async fn try_default(namespace: &str, field_manager: &str) -> Result<Self, ClientError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace, field_manager))
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

#[async_trait::async_trait]
impl WorkloadClientTrait for WorkloadClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_statefulset(&self, name: &str) -> Result<StatefulSet, ClientError> {
        debug!("Fetching StatefulSet {}/{}", self.namespace, name);
        self.statefulsets
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, &format!("StatefulSet {name}")))
    }

    async fn replace_statefulset(&self, name: &str, statefulset: &StatefulSet) -> Result<StatefulSet, ClientError> {
        debug!("Replacing StatefulSet {}/{}", self.namespace, name);
        self.statefulsets
            .replace(name, &self.post_params(), statefulset)
            .await
            .map_err(|e| ClientError::from_kube(e, &format!("StatefulSet {name}")))
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, ClientError> {
        debug!("Fetching Pod {}/{}", self.namespace, name);
        self.pods
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, &format!("Pod {name}")))
    }

    async fn list_network_attachment_definitions(&self, label_selector: &str) -> Result<Vec<NetworkAttachmentDefinition>, ClientError> {
        debug!("Listing NetworkAttachmentDefinitions in {} matching {}", self.namespace, label_selector);
        let params = ListParams::default().labels(label_selector);
        match self.attachments.list(&params).await {
            Ok(list) => Ok(list.items),
            // A 404 on the collection means the CRD is not installed
            Err(kube::Error::Api(response)) if response.code == 404 => Err(ClientError::ResourceTypeMissing(
                "network-attachment-definitions.k8s.cni.cncf.io".to_string(),
            )),
            Err(e) => Err(ClientError::from_kube(e, "NetworkAttachmentDefinition list")),
        }
    }

    async fn get_network_attachment_definition(&self, name: &str) -> Result<NetworkAttachmentDefinition, ClientError> {
        debug!("Fetching NetworkAttachmentDefinition {}/{}", self.namespace, name);
        self.attachments
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, &format!("NetworkAttachmentDefinition {name}")))
    }

    async fn create_network_attachment_definition(&self, definition: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition, ClientError> {
        let name = definition.metadata.name.as_deref().unwrap_or_default();
        debug!("Creating NetworkAttachmentDefinition {}/{}", self.namespace, name);
        self.attachments
            .create(&self.post_params(), definition)
            .await
            .map_err(|e| ClientError::from_kube(e, &format!("NetworkAttachmentDefinition {name}")))
    }

    async fn replace_network_attachment_definition(&self, name: &str, definition: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition, ClientError> {
        debug!("Replacing NetworkAttachmentDefinition {}/{}", self.namespace, name);
        self.attachments
            .replace(name, &self.post_params(), definition)
            .await
            .map_err(|e| ClientError::from_kube(e, &format!("NetworkAttachmentDefinition {name}")))
    }

    async fn delete_network_attachment_definition(&self, name: &str, resource_version: Option<&str>) -> Result<(), ClientError> {
        debug!("Deleting NetworkAttachmentDefinition {}/{}", self.namespace, name);
        let params = DeleteParams {
            preconditions: resource_version.map(|rv| Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            }),
            ..DeleteParams::default()
        };
        self.attachments
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(e, &format!("NetworkAttachmentDefinition {name}")))
    }
}
