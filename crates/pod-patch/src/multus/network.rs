//! Multus desired-state builder.
//!
//! Turns network interface declarations into the canonical Pod template
//! annotation and the set of NetworkAttachmentDefinitions that must exist.

use crate::error::PatchError;
use crate::merge::{ContainerFragment, Ownership, PatchFragment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Pod annotation read by Multus to attach secondary networks
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Capability granted to containers that configure their secondary interfaces
pub const NET_ADMIN: &str = "NET_ADMIN";

/// One secondary interface requested for the workload's Pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    /// Interface name inside the Pod, unique within a request
    pub name: String,
    /// NetworkAttachmentDefinition the interface attaches through. A plain
    /// name resolved in the workload's namespace; `namespace/name`
    /// references are rejected.
    pub attachment: String,
    /// Inline CNI config. When set, the definition is created and owned by
    /// the application; otherwise it must already exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Static IPs requested for the interface
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
}

impl NetworkInterfaceSpec {
    /// Interface attached through an existing definition
    pub fn new(name: impl Into<String>, attachment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attachment: attachment.into(),
            config: None,
            ips: Vec::new(),
        }
    }

    /// Attach through a definition created from `config`
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Request static IPs
    #[must_use]
    pub fn with_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips = ips.into_iter().map(Into::into).collect();
        self
    }
}

/// Entry of the Multus networks annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAnnotation {
    /// NetworkAttachmentDefinition name
    pub name: String,
    /// Interface name inside the Pod
    pub interface: String,
    /// Static IPs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
}

impl From<&NetworkInterfaceSpec> for NetworkAnnotation {
    fn from(spec: &NetworkInterfaceSpec) -> Self {
        Self {
            name: spec.attachment.clone(),
            interface: spec.name.clone(),
            ips: spec.ips.clone(),
        }
    }
}

/// Live annotation entry carrying only the keys this crate writes.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LiveEntry {
    name: String,
    interface: String,
    #[serde(default)]
    ips: Option<Vec<String>>,
}

impl From<LiveEntry> for NetworkAnnotation {
    fn from(entry: LiveEntry) -> Self {
        Self {
            name: entry.name,
            interface: entry.interface,
            ips: entry.ips.unwrap_or_default(),
        }
    }
}

/// Serialize annotation entries canonically: sorted by interface, compact JSON.
pub fn serialize_networks(mut entries: Vec<NetworkAnnotation>) -> Result<String, PatchError> {
    entries.sort_by(|a, b| a.interface.cmp(&b.interface));
    serde_json::to_string(&entries)
        .map_err(|e| PatchError::InvalidSpec(format!("Cannot serialize network annotation: {e}")))
}

/// Canonical form of a live annotation value.
///
/// `None` unless the value is a JSON list whose entries carry nothing but
/// `name`, `interface` and `ips`.
pub fn canonical_networks(value: &str) -> Option<String> {
    let entries: Vec<LiveEntry> = serde_json::from_str(value).ok()?;
    serialize_networks(entries.into_iter().map(NetworkAnnotation::from).collect()).ok()
}

/// Definition names referenced by a live annotation value.
///
/// Accepts the JSON list form, whatever other keys its entries carry, and
/// the short comma-separated form (`net-a,ns/net-b@eth1`). Namespaces are
/// dropped, so a same-named definition elsewhere counts as referenced.
/// Returns `None` when a JSON list cannot be read.
pub fn referenced_attachments(value: &str) -> Option<BTreeSet<String>> {
    if value.trim_start().starts_with('[') {
        let entries: Vec<serde_json::Value> = serde_json::from_str(value).ok()?;
        return entries
            .iter()
            .map(|entry| entry.get("name").and_then(serde_json::Value::as_str).map(str::to_string))
            .collect();
    }
    Some(
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                let item = item.split_once('@').map_or(item, |(name, _)| name);
                item.rsplit_once('/').map_or(item, |(_, name)| name).to_string()
            })
            .collect(),
    )
}

/// Desired Multus state for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultusDesired {
    /// Annotation and capabilities to merge into the Pod template
    pub fragment: PatchFragment,
    /// Owned definitions that must exist, name to CNI config
    pub attachments: BTreeMap<String, serde_json::Value>,
    /// Every definition the annotation references, owned or not
    pub referenced: BTreeSet<String>,
}

/// Ownership of the Multus annotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultusOwnership;

impl Ownership for MultusOwnership {
    fn owns_annotation(&self, key: &str) -> bool {
        key == NETWORKS_ANNOTATION
    }

    fn canonical_annotation(&self, _key: &str, value: &str) -> String {
        canonical_networks(value).unwrap_or_else(|| value.to_string())
    }
}

fn is_dns_subdomain(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

/// Build the desired Multus state.
///
/// Fails with `InvalidSpec` on an empty or duplicate interface name, a
/// definition name that is not a DNS subdomain (including `namespace/name`
/// references), or two different inline configs for the same definition.
pub fn build(interfaces: &[NetworkInterfaceSpec], net_admin_containers: &[String]) -> Result<MultusDesired, PatchError> {
    let mut seen = BTreeSet::new();
    let mut desired = MultusDesired::default();

    for interface in interfaces {
        if interface.name.is_empty() {
            return Err(PatchError::InvalidSpec("Network interface name must not be empty".to_string()));
        }
        if !seen.insert(interface.name.as_str()) {
            return Err(PatchError::InvalidSpec(format!("Duplicate network interface {}", interface.name)));
        }
        if interface.attachment.contains('/') {
            return Err(PatchError::InvalidSpec(format!(
                "NetworkAttachmentDefinition {:?} for interface {} must be a plain name in the workload's namespace",
                interface.attachment, interface.name
            )));
        }
        if !is_dns_subdomain(&interface.attachment) {
            return Err(PatchError::InvalidSpec(format!(
                "Invalid NetworkAttachmentDefinition name {:?} for interface {}",
                interface.attachment, interface.name
            )));
        }
        desired.referenced.insert(interface.attachment.clone());

        if let Some(config) = &interface.config {
            match desired.attachments.get(&interface.attachment) {
                Some(existing) if existing != config => {
                    return Err(PatchError::InvalidSpec(format!(
                        "Conflicting configs for NetworkAttachmentDefinition {}",
                        interface.attachment
                    )));
                }
                Some(_) => {}
                None => {
                    desired.attachments.insert(interface.attachment.clone(), config.clone());
                }
            }
        }
    }

    if !interfaces.is_empty() {
        let value = serialize_networks(interfaces.iter().map(NetworkAnnotation::from).collect())?;
        desired.fragment.annotations.insert(NETWORKS_ANNOTATION.to_string(), value);
    }

    for container in net_admin_containers {
        desired
            .fragment
            .containers
            .entry(container.clone())
            .or_insert_with(ContainerFragment::default)
            .capabilities = vec![NET_ADMIN.to_string()];
    }

    Ok(desired)
}
