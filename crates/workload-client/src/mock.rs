//! Mock WorkloadClient for unit testing
//!
//! This module provides an in-memory implementation of `WorkloadClientTrait`
//! that behaves like a single-namespace API server: every write bumps the
//! object's `resourceVersion`, stale replaces are rejected with `Conflict`,
//! and every call is recorded so tests can assert on write counts and ordering.
//! Failures and concurrent writers can be injected per object.

use crate::error::ClientError;
use crate::workload_trait::WorkloadClientTrait;
use crds::NetworkAttachmentDefinition;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `get_statefulset`
    GetStatefulSet(String),
    /// `replace_statefulset`
    ReplaceStatefulSet(String),
    /// `get_pod`
    GetPod(String),
    /// `list_network_attachment_definitions` (label selector)
    ListAttachments(String),
    /// `get_network_attachment_definition`
    GetAttachment(String),
    /// `create_network_attachment_definition`
    CreateAttachment(String),
    /// `replace_network_attachment_definition`
    ReplaceAttachment(String),
    /// `delete_network_attachment_definition`
    DeleteAttachment(String),
}

impl MockCall {
    /// Whether the call mutates cluster state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::ReplaceStatefulSet(_) | Self::CreateAttachment(_) | Self::ReplaceAttachment(_) | Self::DeleteAttachment(_)
        )
    }
}

/// Mock WorkloadClient for testing
#[derive(Clone, Debug)]
pub struct MockWorkloadClient {
    namespace: String,
    statefulsets: Arc<Mutex<HashMap<String, StatefulSet>>>,
    pods: Arc<Mutex<HashMap<String, Pod>>>,
    attachments: Arc<Mutex<BTreeMap<String, NetworkAttachmentDefinition>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    // Pending injected conflicts on StatefulSet replace
    statefulset_conflicts: Arc<Mutex<u32>>,
    // Pending injected conflicts per NetworkAttachmentDefinition name
    attachment_conflicts: Arc<Mutex<HashMap<String, u32>>>,
    // Status code returned for every write to the named definition
    attachment_failures: Arc<Mutex<HashMap<String, u16>>>,
    crd_installed: Arc<Mutex<bool>>,
    unauthorized: Arc<Mutex<bool>>,
    // Counter for generating resource versions
    next_version: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockWorkloadClient {
    /// Create an empty mock cluster namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            statefulsets: Arc::new(Mutex::new(HashMap::new())),
            pods: Arc::new(Mutex::new(HashMap::new())),
            attachments: Arc::new(Mutex::new(BTreeMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            statefulset_conflicts: Arc::new(Mutex::new(0)),
            attachment_conflicts: Arc::new(Mutex::new(HashMap::new())),
            attachment_failures: Arc::new(Mutex::new(HashMap::new())),
            crd_installed: Arc::new(Mutex::new(true)),
            unauthorized: Arc::new(Mutex::new(false)),
            next_version: Arc::new(Mutex::new(1)),
        }
    }

    /// Generate next resource version
    fn next_version(&self) -> String {
        let mut version = lock(&self.next_version);
        let current = *version;
        *version += 1;
        current.to_string()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    fn check_authorized(&self, what: &str) -> Result<(), ClientError> {
        if *lock(&self.unauthorized) {
            return Err(ClientError::Unauthorized(what.to_string()));
        }
        Ok(())
    }

    /// Add a StatefulSet to the mock store (for test setup)
    pub fn add_statefulset(&self, mut statefulset: StatefulSet) {
        statefulset.metadata.resource_version = Some(self.next_version());
        lock(&self.statefulsets).insert(statefulset.name_any(), statefulset);
    }

    /// Add a Pod to the mock store (for test setup)
    pub fn add_pod(&self, mut pod: Pod) {
        pod.metadata.resource_version = Some(self.next_version());
        lock(&self.pods).insert(pod.name_any(), pod);
    }

    /// Add a NetworkAttachmentDefinition to the mock store (for test setup)
    pub fn add_attachment(&self, mut definition: NetworkAttachmentDefinition) {
        definition.metadata.resource_version = Some(self.next_version());
        lock(&self.attachments).insert(definition.name_any(), definition);
    }

    /// Current stored StatefulSet
    pub fn statefulset(&self, name: &str) -> Option<StatefulSet> {
        lock(&self.statefulsets).get(name).cloned()
    }

    /// Current stored NetworkAttachmentDefinition
    pub fn attachment(&self, name: &str) -> Option<NetworkAttachmentDefinition> {
        lock(&self.attachments).get(name).cloned()
    }

    /// Names of all stored NetworkAttachmentDefinitions, sorted
    pub fn attachment_names(&self) -> Vec<String> {
        lock(&self.attachments).keys().cloned().collect()
    }

    /// Modify a stored StatefulSet out of band, as another client would
    pub fn mutate_statefulset(&self, name: &str, mutate: impl FnOnce(&mut StatefulSet)) {
        let version = self.next_version();
        if let Some(statefulset) = lock(&self.statefulsets).get_mut(name) {
            mutate(statefulset);
            statefulset.metadata.resource_version = Some(version);
        }
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Only the mutating calls received so far
    pub fn write_calls(&self) -> Vec<MockCall> {
        self.calls().into_iter().filter(MockCall::is_write).collect()
    }

    /// Number of StatefulSet replace attempts, including rejected ones
    pub fn replace_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::ReplaceStatefulSet(_)))
            .count()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make the next `count` StatefulSet replaces lose a race against another writer
    pub fn inject_statefulset_conflicts(&self, count: u32) {
        *lock(&self.statefulset_conflicts) = count;
    }

    /// Make the next `count` writes to the named definition lose a race against another writer
    pub fn inject_attachment_conflicts(&self, name: &str, count: u32) {
        lock(&self.attachment_conflicts).insert(name.to_string(), count);
    }

    /// Make every write to the named definition fail with the given status code
    pub fn fail_attachment(&self, name: &str, code: u16) {
        lock(&self.attachment_failures).insert(name.to_string(), code);
    }

    /// Simulate the NetworkAttachmentDefinition CRD being (un)installed
    pub fn set_crd_installed(&self, installed: bool) {
        *lock(&self.crd_installed) = installed;
    }

    /// Simulate an API server that rejects credentials
    pub fn set_unauthorized(&self, unauthorized: bool) {
        *lock(&self.unauthorized) = unauthorized;
    }

    fn take_statefulset_conflict(&self, name: &str) -> bool {
        let mut pending = lock(&self.statefulset_conflicts);
        if *pending == 0 {
            return false;
        }
        *pending -= 1;
        drop(pending);
        // Another writer got there first
        self.mutate_statefulset(name, |_| {});
        true
    }

    fn check_attachment_write(&self, name: &str) -> Result<(), ClientError> {
        if let Some(code) = lock(&self.attachment_failures).get(name) {
            return Err(ClientError::Api {
                code: *code,
                reason: "InjectedFailure".to_string(),
                message: format!("injected failure for NetworkAttachmentDefinition {name}"),
            });
        }
        let conflicted = match lock(&self.attachment_conflicts).get_mut(name) {
            Some(pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        };
        if conflicted {
            let version = self.next_version();
            if let Some(existing) = lock(&self.attachments).get_mut(name) {
                existing.metadata.resource_version = Some(version);
            }
            return Err(ClientError::Conflict(format!("NetworkAttachmentDefinition {name}")));
        }
        Ok(())
    }

    fn check_crd(&self) -> Result<(), ClientError> {
        if *lock(&self.crd_installed) {
            Ok(())
        } else {
            Err(ClientError::ResourceTypeMissing(
                "network-attachment-definitions.k8s.cni.cncf.io".to_string(),
            ))
        }
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).is_some_and(|v| v == value.trim()),
            None => labels.contains_key(term.trim()),
        })
}

#[async_trait::async_trait]
impl WorkloadClientTrait for MockWorkloadClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_statefulset(&self, name: &str) -> Result<StatefulSet, ClientError> {
        self.record(MockCall::GetStatefulSet(name.to_string()));
        self.check_authorized(name)?;
        self.statefulset(name)
            .ok_or_else(|| ClientError::NotFound(format!("StatefulSet {name}")))
    }

    async fn replace_statefulset(&self, name: &str, statefulset: &StatefulSet) -> Result<StatefulSet, ClientError> {
        self.record(MockCall::ReplaceStatefulSet(name.to_string()));
        self.check_authorized(name)?;
        if self.take_statefulset_conflict(name) {
            return Err(ClientError::Conflict(format!("StatefulSet {name}")));
        }
        let version = self.next_version();
        let mut store = lock(&self.statefulsets);
        let current = store
            .get(name)
            .ok_or_else(|| ClientError::NotFound(format!("StatefulSet {name}")))?;
        if let Some(expected) = statefulset.metadata.resource_version.as_deref()
            && current.metadata.resource_version.as_deref() != Some(expected)
        {
            return Err(ClientError::Conflict(format!("StatefulSet {name}")));
        }
        let mut stored = statefulset.clone();
        stored.metadata.resource_version = Some(version);
        store.insert(name.to_string(), stored.clone());
        Ok(stored)
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, ClientError> {
        self.record(MockCall::GetPod(name.to_string()));
        self.check_authorized(name)?;
        lock(&self.pods)
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("Pod {name}")))
    }

    async fn list_network_attachment_definitions(&self, label_selector: &str) -> Result<Vec<NetworkAttachmentDefinition>, ClientError> {
        self.record(MockCall::ListAttachments(label_selector.to_string()));
        self.check_authorized(label_selector)?;
        self.check_crd()?;
        Ok(lock(&self.attachments)
            .values()
            .filter(|definition| matches_selector(definition.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn get_network_attachment_definition(&self, name: &str) -> Result<NetworkAttachmentDefinition, ClientError> {
        self.record(MockCall::GetAttachment(name.to_string()));
        self.check_authorized(name)?;
        self.check_crd()?;
        self.attachment(name)
            .ok_or_else(|| ClientError::NotFound(format!("NetworkAttachmentDefinition {name}")))
    }

    async fn create_network_attachment_definition(&self, definition: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition, ClientError> {
        let name = definition.name_any();
        self.record(MockCall::CreateAttachment(name.clone()));
        self.check_authorized(&name)?;
        self.check_crd()?;
        self.check_attachment_write(&name)?;
        let version = self.next_version();
        let mut store = lock(&self.attachments);
        if store.contains_key(&name) {
            return Err(ClientError::AlreadyExists(format!("NetworkAttachmentDefinition {name}")));
        }
        let mut stored = definition.clone();
        stored.metadata.namespace = Some(self.namespace.clone());
        stored.metadata.resource_version = Some(version);
        store.insert(name, stored.clone());
        Ok(stored)
    }

    async fn replace_network_attachment_definition(&self, name: &str, definition: &NetworkAttachmentDefinition) -> Result<NetworkAttachmentDefinition, ClientError> {
        self.record(MockCall::ReplaceAttachment(name.to_string()));
        self.check_authorized(name)?;
        self.check_crd()?;
        self.check_attachment_write(name)?;
        let version = self.next_version();
        let mut store = lock(&self.attachments);
        let current = store
            .get(name)
            .ok_or_else(|| ClientError::NotFound(format!("NetworkAttachmentDefinition {name}")))?;
        if let Some(expected) = definition.metadata.resource_version.as_deref()
            && current.metadata.resource_version.as_deref() != Some(expected)
        {
            return Err(ClientError::Conflict(format!("NetworkAttachmentDefinition {name}")));
        }
        let mut stored = definition.clone();
        stored.metadata.resource_version = Some(version);
        store.insert(name.to_string(), stored.clone());
        Ok(stored)
    }

    async fn delete_network_attachment_definition(&self, name: &str, resource_version: Option<&str>) -> Result<(), ClientError> {
        self.record(MockCall::DeleteAttachment(name.to_string()));
        self.check_authorized(name)?;
        self.check_crd()?;
        self.check_attachment_write(name)?;
        let mut store = lock(&self.attachments);
        let current = store
            .get(name)
            .ok_or_else(|| ClientError::NotFound(format!("NetworkAttachmentDefinition {name}")))?;
        if let Some(expected) = resource_version
            && current.metadata.resource_version.as_deref() != Some(expected)
        {
            return Err(ClientError::Conflict(format!("NetworkAttachmentDefinition {name}")));
        }
        store.remove(name);
        Ok(())
    }
}
