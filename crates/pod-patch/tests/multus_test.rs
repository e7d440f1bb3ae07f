//! Multus reconciler behaviour against the mock cluster.

mod common;

use common::{APP, annotations, client, cluster, config, template_container};
use crds::{CREATED_BY_LABEL, NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};
use kube::ResourceExt;
use pod_patch::multus::{NET_ADMIN, NETWORKS_ANNOTATION};
use pod_patch::{KubernetesMultus, NetworkInterfaceSpec, PatchError};
use serde_json::json;
use workload_client::{ClientError, MockCall, MockWorkloadClient};

fn multus(mock: &MockWorkloadClient, interfaces: Vec<NetworkInterfaceSpec>, net_admin: &[&str]) -> KubernetesMultus {
    KubernetesMultus::new(
        client(mock),
        config(),
        interfaces,
        net_admin.iter().map(|name| (*name).to_string()).collect(),
    )
}

fn macvlan() -> serde_json::Value {
    json!({"cniVersion": "0.3.1", "type": "macvlan", "master": "eth0", "ipam": {"type": "static"}})
}

fn position(calls: &[MockCall], call: &MockCall) -> usize {
    calls.iter().position(|c| c == call).expect("call was made")
}

fn set_networks(mock: &MockWorkloadClient, value: &str) {
    mock.mutate_statefulset(APP, |statefulset| {
        if let Some(spec) = statefulset.spec.as_mut() {
            spec.template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(Default::default)
                .insert(NETWORKS_ANNOTATION.into(), value.into());
        }
    });
}

/// Orphan `nad-a` still referenced by `live`: it must outlive the patch.
async fn assert_delete_deferred(live: &str) {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("nad-a", APP, &macvlan()));
    set_networks(&mock, live);

    multus(&mock, Vec::new(), &[]).reconcile().await.unwrap();

    assert!(!annotations(&mock).contains_key(NETWORKS_ANNOTATION));
    assert!(mock.attachment("nad-a").is_none());
    let writes = mock.write_calls();
    assert!(
        position(&writes, &MockCall::ReplaceStatefulSet(APP.into()))
            < position(&writes, &MockCall::DeleteAttachment("nad-a".into())),
        "deleted before patch with live annotation {live}: {writes:?}"
    );
}

#[tokio::test]
async fn test_single_interface_sets_annotation_and_creates_attachment() {
    let mock = cluster(&["upf"]);
    let reconciler = multus(
        &mock,
        vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())],
        &[],
    );

    reconciler.reconcile().await.unwrap();

    assert_eq!(
        annotations(&mock).get(NETWORKS_ANNOTATION).map(String::as_str),
        Some(r#"[{"name":"nad-a","interface":"net1"}]"#)
    );
    let definition = mock.attachment("nad-a").expect("definition created");
    assert!(definition.is_owned_by(APP));
    assert!(definition.config_matches(&macvlan()));
}

#[tokio::test]
async fn test_attachment_is_created_before_statefulset_is_patched() {
    let mock = cluster(&["upf"]);
    multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap();

    let writes = mock.write_calls();
    assert!(
        position(&writes, &MockCall::CreateAttachment("nad-a".into()))
            < position(&writes, &MockCall::ReplaceStatefulSet(APP.into()))
    );
}

#[tokio::test]
async fn test_second_reconcile_writes_nothing() {
    let mock = cluster(&["upf"]);
    let reconciler = multus(
        &mock,
        vec![
            NetworkInterfaceSpec::new("core", "core-net").with_config(macvlan()).with_ips(["192.168.250.3/24"]),
            NetworkInterfaceSpec::new("access", "access-net").with_config(macvlan()),
        ],
        &["upf"],
    );

    reconciler.reconcile().await.unwrap();
    mock.clear_calls();
    reconciler.reconcile().await.unwrap();

    assert!(mock.write_calls().is_empty(), "unexpected writes: {:?}", mock.write_calls());
    assert!(reconciler.is_configured().await.unwrap());
}

#[tokio::test]
async fn test_empty_request_removes_annotation_and_deletes_after_patch() {
    let mock = cluster(&["upf"]);
    multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap();
    mock.clear_calls();

    multus(&mock, Vec::new(), &[]).reconcile().await.unwrap();

    assert!(!annotations(&mock).contains_key(NETWORKS_ANNOTATION));
    assert!(mock.attachment("nad-a").is_none());
    let writes = mock.write_calls();
    assert!(
        position(&writes, &MockCall::ReplaceStatefulSet(APP.into()))
            < position(&writes, &MockCall::DeleteAttachment("nad-a".into()))
    );
}

#[tokio::test]
async fn test_unreferenced_orphan_is_deleted_before_patch() {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("leftover", APP, &macvlan()));

    multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap();

    assert_eq!(mock.attachment_names(), vec!["nad-a".to_string()]);
    let writes = mock.write_calls();
    assert!(
        position(&writes, &MockCall::DeleteAttachment("leftover".into()))
            < position(&writes, &MockCall::ReplaceStatefulSet(APP.into()))
    );
}

#[tokio::test]
async fn test_referenced_orphan_waits_for_patch_whatever_the_annotation_form() {
    assert_delete_deferred(r#"[{"name":"nad-a","interface":"net1","ips":null}]"#).await;
    assert_delete_deferred(r#"[{"name":"nad-a","interface":"net1","mac":"02:00:00:00:00:01"}]"#).await;
    assert_delete_deferred("nad-a").await;
    assert_delete_deferred("core/nad-a@net1").await;
}

#[tokio::test]
async fn test_unreadable_annotation_defers_every_orphan() {
    assert_delete_deferred(r#"[{"name":"nad-a","#).await;
}

#[tokio::test]
async fn test_extra_annotation_keys_are_rewritten() {
    let mock = cluster(&["upf"]);
    let reconciler = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[]);
    reconciler.reconcile().await.unwrap();
    set_networks(&mock, r#"[{"name":"nad-a","interface":"net1","mac":"02:00:00:00:00:01"}]"#);
    mock.clear_calls();

    assert!(!reconciler.is_configured().await.unwrap());
    reconciler.reconcile().await.unwrap();

    assert_eq!(
        annotations(&mock).get(NETWORKS_ANNOTATION).map(String::as_str),
        Some(r#"[{"name":"nad-a","interface":"net1"}]"#)
    );
    assert_eq!(mock.write_calls(), vec![MockCall::ReplaceStatefulSet(APP.into())]);
}

#[tokio::test]
async fn test_null_ips_in_live_annotation_is_not_rewritten() {
    let mock = cluster(&["upf"]);
    let reconciler = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[]);
    reconciler.reconcile().await.unwrap();
    set_networks(&mock, r#"[{"interface":"net1","name":"nad-a","ips":null}]"#);
    mock.clear_calls();

    reconciler.reconcile().await.unwrap();

    assert!(mock.write_calls().is_empty(), "unexpected writes: {:?}", mock.write_calls());
}

#[tokio::test]
async fn test_foreign_state_is_preserved() {
    let mock = cluster(&["upf"]);
    mock.mutate_statefulset(APP, |statefulset| {
        if let Some(spec) = statefulset.spec.as_mut() {
            spec.template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(Default::default)
                .insert("kubectl.kubernetes.io/restartedAt".into(), "2024-01-01T00:00:00Z".into());
        }
    });
    let foreign = NetworkAttachmentDefinition::new(
        "shared",
        NetworkAttachmentDefinitionSpec {
            config: Some(r#"{"type":"bridge"}"#.into()),
        },
    );
    mock.add_attachment(foreign.clone());

    let reconciler = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "shared")], &[]);
    reconciler.reconcile().await.unwrap();
    multus(&mock, Vec::new(), &[]).reconcile().await.unwrap();

    assert_eq!(
        annotations(&mock).get("kubectl.kubernetes.io/restartedAt").map(String::as_str),
        Some("2024-01-01T00:00:00Z")
    );
    let shared = mock.attachment("shared").expect("foreign definition kept");
    assert_eq!(shared.spec, foreign.spec);
    assert!(!mock.write_calls().iter().any(|call| matches!(
        call,
        MockCall::CreateAttachment(name) | MockCall::ReplaceAttachment(name) | MockCall::DeleteAttachment(name) if name == "shared"
    )));
}

#[tokio::test]
async fn test_drifted_attachment_is_updated_through_conflicts() {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("nad-a", APP, &json!({"type": "bridge"})));
    mock.inject_attachment_conflicts("nad-a", 2);

    multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap();

    let definition = mock.attachment("nad-a").expect("definition kept");
    assert!(definition.config_matches(&macvlan()));
    assert_eq!(
        definition.labels().get(CREATED_BY_LABEL).map(String::as_str),
        Some(APP)
    );
}

#[tokio::test]
async fn test_attachment_conflicts_exhausted_still_patches() {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("nad-a", APP, &json!({"type": "bridge"})));
    mock.inject_attachment_conflicts("nad-a", 3);

    let err = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap_err();

    match err {
        PatchError::PartialReconcile { failed, errors } => {
            assert_eq!(failed, vec!["nad-a".to_string()]);
            assert!(matches!(
                errors[0],
                PatchError::ConcurrentModification { attempts: 3, .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(annotations(&mock).contains_key(NETWORKS_ANNOTATION));
    assert!(!mock.attachment("nad-a").expect("definition kept").config_matches(&macvlan()));
}

#[tokio::test]
async fn test_interrupted_reconcile_completes_on_next_call() {
    let mock = cluster(&["upf"]);
    let reconciler = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[]);
    mock.inject_statefulset_conflicts(3);

    let err = reconciler.reconcile().await.unwrap_err();
    assert!(matches!(err, PatchError::ConcurrentModification { kind: "StatefulSet", .. }));
    assert!(mock.attachment("nad-a").is_some());
    assert!(!annotations(&mock).contains_key(NETWORKS_ANNOTATION));

    mock.clear_calls();
    reconciler.reconcile().await.unwrap();
    assert!(!mock.write_calls().contains(&MockCall::CreateAttachment("nad-a".into())));
    assert!(annotations(&mock).contains_key(NETWORKS_ANNOTATION));

    mock.clear_calls();
    reconciler.reconcile().await.unwrap();
    assert!(mock.write_calls().is_empty());
}

#[tokio::test]
async fn test_patch_failure_is_reported_with_attachment_failures() {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("stale", APP, &macvlan()));
    mock.fail_attachment("stale", 503);
    mock.inject_statefulset_conflicts(3);

    let err = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap_err();

    match err {
        PatchError::PartialReconcile { failed, errors } => {
            assert_eq!(failed, vec!["stale".to_string(), format!("StatefulSet/{APP}")]);
            assert_eq!(errors[0].status_code(), Some(503));
            assert!(matches!(errors[1], PatchError::ConcurrentModification { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_namespaced_attachment_is_rejected_without_io() {
    let mock = cluster(&["upf"]);

    let err = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "infra/shared")], &[])
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(err, PatchError::InvalidSpec(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_failed_create_skips_patch_and_reports_partial() {
    let mock = cluster(&["upf"]);
    mock.fail_attachment("nad-b", 500);

    let err = multus(
        &mock,
        vec![
            NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan()),
            NetworkInterfaceSpec::new("net2", "nad-b").with_config(macvlan()),
        ],
        &[],
    )
    .reconcile()
    .await
    .unwrap_err();

    match err {
        PatchError::PartialReconcile { failed, errors } => {
            assert_eq!(failed, vec!["nad-b".to_string()]);
            assert_eq!(errors[0].status_code(), Some(500));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(mock.attachment("nad-a").is_some());
    assert!(!annotations(&mock).contains_key(NETWORKS_ANNOTATION));
    assert_eq!(mock.replace_attempts(), 0);
}

#[tokio::test]
async fn test_failed_orphan_delete_does_not_block_patch() {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("stale", APP, &macvlan()));
    mock.fail_attachment("stale", 503);

    let err = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(err, PatchError::PartialReconcile { ref failed, .. } if failed == &["stale".to_string()]));
    assert!(err.is_retryable());
    assert!(annotations(&mock).contains_key(NETWORKS_ANNOTATION));
    assert!(mock.attachment("stale").is_some());
}

#[tokio::test]
async fn test_net_admin_is_added_and_never_removed() {
    let mock = cluster(&["upf", "sidecar"]);

    multus(&mock, Vec::new(), &["upf"]).reconcile().await.unwrap();
    let added = template_container(&mock, "upf")
        .security_context
        .and_then(|sc| sc.capabilities)
        .and_then(|caps| caps.add)
        .unwrap_or_default();
    assert_eq!(added, vec![NET_ADMIN.to_string()]);

    multus(&mock, Vec::new(), &[]).reconcile().await.unwrap();
    assert!(template_container(&mock, "upf").security_context.is_some());
    assert!(template_container(&mock, "sidecar").security_context.is_none());
}

#[tokio::test]
async fn test_missing_container_fails_before_any_write() {
    let mock = cluster(&["upf"]);

    let err = multus(
        &mock,
        vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())],
        &["missing"],
    )
    .reconcile()
    .await
    .unwrap_err();

    assert!(matches!(err, PatchError::ContainerNotFound { ref container, .. } if container == "missing"));
    assert!(mock.write_calls().is_empty());
}

#[tokio::test]
async fn test_missing_statefulset_is_not_found() {
    let mock = MockWorkloadClient::new(common::NAMESPACE);

    let err = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a")], &[])
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(err, PatchError::NotFound { kind: "StatefulSet", .. }));
}

#[tokio::test]
async fn test_missing_crd_is_reported() {
    let mock = cluster(&["upf"]);
    mock.set_crd_installed(false);

    let err = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &[])
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PatchError::Apply {
            source: ClientError::ResourceTypeMissing(_),
            ..
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_is_configured_tracks_state() {
    let mock = cluster(&["upf"]);
    let reconciler = multus(&mock, vec![NetworkInterfaceSpec::new("net1", "nad-a").with_config(macvlan())], &["upf"]);

    assert!(!reconciler.is_configured().await.unwrap());
    reconciler.reconcile().await.unwrap();
    assert!(reconciler.is_configured().await.unwrap());

    mock.set_unauthorized(true);
    assert!(!reconciler.is_configured().await.unwrap());
}

#[tokio::test]
async fn test_remove_deletes_only_owned_attachments() {
    let mock = cluster(&["upf"]);
    mock.add_attachment(NetworkAttachmentDefinition::owned("nad-a", APP, &macvlan()));
    mock.add_attachment(NetworkAttachmentDefinition::owned("other-app", "smf", &macvlan()));

    multus(&mock, Vec::new(), &[]).remove().await.unwrap();

    assert_eq!(mock.attachment_names(), vec!["other-app".to_string()]);
}
