//! NetworkAttachmentDefinition CRD
//!
//! Secondary network declaration consumed by the Multus CNI meta-plugin.
//! Pods reference it by name through the `k8s.v1.cni.cncf.io/networks`
//! annotation.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label marking a NetworkAttachmentDefinition as created by an application.
///
/// Only definitions carrying this label with the reconciling application's
/// name are ever updated or deleted.
pub const CREATED_BY_LABEL: &str = "app.juju.is/created-by";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI configuration, serialized as a JSON document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl NetworkAttachmentDefinition {
    /// Build a definition owned by `app_name` with the given CNI config.
    pub fn owned(name: &str, app_name: &str, config: &serde_json::Value) -> Self {
        let mut def = Self::new(
            name,
            NetworkAttachmentDefinitionSpec {
                config: Some(config.to_string()),
            },
        );
        def.metadata = ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                CREATED_BY_LABEL.to_string(),
                app_name.to_string(),
            )])),
            ..Default::default()
        };
        def
    }

    /// Label selector matching every definition owned by `app_name`.
    pub fn owner_selector(app_name: &str) -> String {
        format!("{CREATED_BY_LABEL}={app_name}")
    }

    /// Whether this definition carries the ownership label for `app_name`.
    pub fn is_owned_by(&self, app_name: &str) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CREATED_BY_LABEL))
            .is_some_and(|owner| owner == app_name)
    }

    /// Parsed CNI config, `None` when absent or not valid JSON.
    pub fn config_value(&self) -> Option<serde_json::Value> {
        self.spec
            .config
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Compares the CNI config by JSON value, ignoring formatting and key order.
    pub fn config_matches(&self, desired: &serde_json::Value) -> bool {
        self.config_value().as_ref() == Some(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;
    use serde_json::json;

    #[test]
    fn test_owned_definition_carries_label_and_config() {
        let config = json!({"cniVersion": "0.3.1", "type": "macvlan"});
        let def = NetworkAttachmentDefinition::owned("access-net", "upf", &config);

        assert_eq!(def.name_any(), "access-net");
        assert!(def.is_owned_by("upf"));
        assert!(!def.is_owned_by("amf"));
        assert!(def.config_matches(&config));
    }

    #[test]
    fn test_config_match_ignores_formatting() {
        let mut def = NetworkAttachmentDefinition::owned("core-net", "upf", &json!({}));
        def.spec.config = Some("{ \"type\" : \"bridge\",\n \"cniVersion\": \"0.3.1\" }".to_string());

        assert!(def.config_matches(&json!({"cniVersion": "0.3.1", "type": "bridge"})));
        assert!(!def.config_matches(&json!({"cniVersion": "0.3.1", "type": "macvlan"})));
    }

    #[test]
    fn test_unlabelled_definition_is_foreign() {
        let def = NetworkAttachmentDefinition::new("shared-net", NetworkAttachmentDefinitionSpec::default());
        assert!(!def.is_owned_by("upf"));
        assert!(def.config_value().is_none());
    }

    #[test]
    fn test_owner_selector() {
        assert_eq!(
            NetworkAttachmentDefinition::owner_selector("upf"),
            "app.juju.is/created-by=upf"
        );
    }
}
