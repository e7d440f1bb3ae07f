//! Diff & merge engine.
//!
//! Merges a desired [`PatchFragment`] into a live Pod template key by key.
//! For every map-like field (annotations, volumes, volume mounts, resource
//! limits and requests) the live entries are split by an [`Ownership`]
//! predicate: desired entries replace the owned partition wholesale, foreign
//! entries pass through untouched. `changed` compares the owned partitions
//! by value after canonicalisation, so merging the merged output again with
//! the same desired state always reports `changed == false`.

use crate::error::PatchError;
use k8s_openapi::api::core::v1::{Capabilities, Container, PodTemplateSpec, ResourceRequirements, SecurityContext, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Outcome of a merge: the merged value and whether owned state differs from live.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    /// Merged value
    pub value: T,
    /// Whether the owned partition changed
    pub changed: bool,
}

/// Recognises the keys a reconciler owns.
///
/// Every predicate defaults to "owns nothing", so a reconciler only
/// declares the fields it manages.
pub trait Ownership {
    /// Pod template annotation key
    fn owns_annotation(&self, _key: &str) -> bool {
        false
    }

    /// Pod volume name
    fn owns_volume(&self, _name: &str) -> bool {
        false
    }

    /// Container volume mount name
    fn owns_mount(&self, _name: &str) -> bool {
        false
    }

    /// Container resource name (limits and requests)
    fn owns_resource(&self, _name: &str) -> bool {
        false
    }

    /// Canonical form of an owned annotation value, used for comparison
    fn canonical_annotation(&self, _key: &str, value: &str) -> String {
        value.to_string()
    }

    /// Canonical form of an owned resource quantity, used for comparison
    fn canonical_quantity(&self, _name: &str, value: &Quantity) -> Quantity {
        value.clone()
    }

    /// Reject a merged target container the API server would refuse
    fn check_container(&self, _container: &Container) -> Result<(), String> {
        Ok(())
    }
}

/// Desired entries for one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerFragment {
    /// Owned volume mounts
    pub volume_mounts: Vec<VolumeMount>,
    /// Owned resource limits
    pub limits: BTreeMap<String, Quantity>,
    /// Owned resource requests
    pub requests: BTreeMap<String, Quantity>,
    /// Capabilities that must be present in `securityContext.capabilities.add`.
    /// These are only ever added, never removed.
    pub capabilities: Vec<String>,
}

/// Canonical desired state produced by a builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchFragment {
    /// Owned Pod template annotations
    pub annotations: BTreeMap<String, String>,
    /// Owned Pod volumes
    pub volumes: Vec<Volume>,
    /// Desired entries per target container. Containers of the template that
    /// are not listed get their owned entries removed.
    pub containers: BTreeMap<String, ContainerFragment>,
}

/// Merge a keyed list. Foreign entries keep their order; owned entries are
/// appended sorted by key.
pub fn merge_keyed<T, K>(
    live: &[T],
    desired: &[T],
    key: impl Fn(&T) -> K,
    owns: impl Fn(&T) -> bool,
) -> Merged<Vec<T>>
where
    T: Clone + PartialEq,
    K: Ord,
{
    let (owned_live, foreign): (Vec<&T>, Vec<&T>) = live.iter().partition(|item| owns(item));

    let mut owned_live: Vec<T> = owned_live.into_iter().cloned().collect();
    owned_live.sort_by(|a, b| key(a).cmp(&key(b)));
    let mut owned_desired = desired.to_vec();
    owned_desired.sort_by(|a, b| key(a).cmp(&key(b)));

    let changed = owned_live != owned_desired;
    let mut value: Vec<T> = foreign.into_iter().cloned().collect();
    value.extend(owned_desired);
    Merged { value, changed }
}

/// Merge a string-keyed map, comparing owned live values through `canonical`.
pub fn merge_map<V>(
    live: Option<&BTreeMap<String, V>>,
    desired: &BTreeMap<String, V>,
    owns: impl Fn(&str) -> bool,
    canonical: impl Fn(&str, &V) -> V,
) -> Merged<Option<BTreeMap<String, V>>>
where
    V: Clone + PartialEq,
{
    let mut value = BTreeMap::new();
    let mut owned_live = BTreeMap::new();
    for (key, entry) in live.into_iter().flatten() {
        if owns(key) {
            owned_live.insert(key.clone(), canonical(key, entry));
        } else {
            value.insert(key.clone(), entry.clone());
        }
    }

    let changed = &owned_live != desired;
    value.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    let value = if value.is_empty() && live.is_none() { None } else { Some(value) };
    Merged { value, changed }
}

fn non_empty<T>(items: Vec<T>, live_was_set: bool) -> Option<Vec<T>> {
    if items.is_empty() && !live_was_set { None } else { Some(items) }
}

/// Merge the desired fragment into a Pod template.
///
/// Fails with `ContainerNotFound` when the fragment targets a container the
/// template does not have, and with `InvalidSpec` when a merged target
/// container fails [`Ownership::check_container`].
pub fn merge_template(
    statefulset: &str,
    live: &PodTemplateSpec,
    desired: &PatchFragment,
    ownership: &impl Ownership,
) -> Result<Merged<PodTemplateSpec>, PatchError> {
    let mut template = live.clone();
    let mut changed = false;

    let metadata = template.metadata.get_or_insert_with(Default::default);
    let annotations = merge_map(
        metadata.annotations.as_ref(),
        &desired.annotations,
        |key| ownership.owns_annotation(key),
        |key, value| ownership.canonical_annotation(key, value),
    );
    changed |= annotations.changed;
    metadata.annotations = annotations.value;

    let spec = template.spec.get_or_insert_with(Default::default);

    for name in desired.containers.keys() {
        if !spec.containers.iter().any(|c| &c.name == name) {
            return Err(PatchError::ContainerNotFound {
                statefulset: statefulset.to_string(),
                container: name.clone(),
            });
        }
    }

    let live_volumes = spec.volumes.take();
    let volumes = merge_keyed(
        live_volumes.as_deref().unwrap_or_default(),
        &desired.volumes,
        |v| v.name.clone(),
        |v| ownership.owns_volume(&v.name),
    );
    changed |= volumes.changed;
    spec.volumes = non_empty(volumes.value, live_volumes.is_some());

    let empty = ContainerFragment::default();
    for container in &mut spec.containers {
        let Some(fragment) = desired.containers.get(&container.name) else {
            changed |= merge_container(container, &empty, ownership);
            continue;
        };
        changed |= merge_container(container, fragment, ownership);
        ownership.check_container(container).map_err(|reason| {
            PatchError::InvalidSpec(format!(
                "Container {} of StatefulSet {}: {}",
                container.name, statefulset, reason
            ))
        })?;
    }

    Ok(Merged { value: template, changed })
}

fn merge_container(container: &mut Container, desired: &ContainerFragment, ownership: &impl Ownership) -> bool {
    let mut changed = false;

    let live_mounts = container.volume_mounts.take();
    let mounts = merge_keyed(
        live_mounts.as_deref().unwrap_or_default(),
        &desired.volume_mounts,
        |m| (m.name.clone(), m.mount_path.clone()),
        |m| ownership.owns_mount(&m.name),
    );
    changed |= mounts.changed;
    container.volume_mounts = non_empty(mounts.value, live_mounts.is_some());

    let live_resources = container.resources.take();
    let (live_limits, live_requests, claims) = match &live_resources {
        Some(r) => (r.limits.as_ref(), r.requests.as_ref(), r.claims.clone()),
        None => (None, None, None),
    };
    let limits = merge_map(
        live_limits,
        &desired.limits,
        |name| ownership.owns_resource(name),
        |name, q| ownership.canonical_quantity(name, q),
    );
    let requests = merge_map(
        live_requests,
        &desired.requests,
        |name| ownership.owns_resource(name),
        |name, q| ownership.canonical_quantity(name, q),
    );
    changed |= limits.changed || requests.changed;
    container.resources = if live_resources.is_none() && limits.value.is_none() && requests.value.is_none() {
        None
    } else {
        Some(ResourceRequirements {
            limits: limits.value,
            requests: requests.value,
            claims,
        })
    };

    changed |= add_capabilities(container, &desired.capabilities);
    changed
}

fn add_capabilities(container: &mut Container, wanted: &[String]) -> bool {
    let present = container
        .security_context
        .as_ref()
        .and_then(|sc| sc.capabilities.as_ref())
        .and_then(|caps| caps.add.as_ref());
    let missing: Vec<String> = wanted
        .iter()
        .filter(|cap| !present.is_some_and(|added| added.contains(*cap)))
        .cloned()
        .collect();
    if missing.is_empty() {
        return false;
    }

    let context = container.security_context.get_or_insert_with(SecurityContext::default);
    let capabilities = context.capabilities.get_or_insert_with(Capabilities::default);
    capabilities.add.get_or_insert_with(Vec::new).extend(missing);
    true
}
