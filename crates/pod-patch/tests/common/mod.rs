//! Shared fixtures for reconciler tests.

#![allow(dead_code)]

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use pod_patch::{ReconcilerConfig, RetryPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use workload_client::{MockWorkloadClient, WorkloadClientTrait};

pub const NAMESPACE: &str = "core";
pub const APP: &str = "upf";

pub fn container(name: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(format!("registry.local/{name}:1.0")),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([("memory".to_string(), Quantity("256Mi".into()))])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn statefulset(containers: Vec<Container>) -> StatefulSet {
    let labels = BTreeMap::from([("app.kubernetes.io/name".to_string(), APP.to_string())]);
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(APP.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod(name: &str, template: &PodTemplateSpec) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: template.spec.clone(),
        ..Default::default()
    }
}

/// Mock cluster holding the `upf` StatefulSet with the given containers
pub fn cluster(containers: &[&str]) -> MockWorkloadClient {
    let mock = MockWorkloadClient::new(NAMESPACE);
    mock.add_statefulset(statefulset(containers.iter().map(|name| container(name)).collect()));
    mock
}

pub fn client(mock: &MockWorkloadClient) -> Arc<dyn WorkloadClientTrait> {
    Arc::new(mock.clone())
}

pub fn config() -> ReconcilerConfig {
    ReconcilerConfig::new(NAMESPACE, APP).with_retry(RetryPolicy::immediate(3))
}

pub fn template(mock: &MockWorkloadClient) -> PodTemplateSpec {
    mock.statefulset(APP)
        .and_then(|statefulset| statefulset.spec)
        .map(|spec| spec.template)
        .expect("statefulset exists")
}

pub fn annotations(mock: &MockWorkloadClient) -> BTreeMap<String, String> {
    template(mock)
        .metadata
        .and_then(|meta| meta.annotations)
        .unwrap_or_default()
}

pub fn template_container(mock: &MockWorkloadClient, name: &str) -> Container {
    template(mock)
        .spec
        .and_then(|spec| spec.containers.into_iter().find(|c| c.name == name))
        .expect("container exists")
}

pub fn limit_of(mock: &MockWorkloadClient, container: &str, resource: &str) -> Option<String> {
    template_container(mock, container)
        .resources
        .and_then(|r| r.limits)
        .and_then(|limits| limits.get(resource).map(|q| q.0.clone()))
}
