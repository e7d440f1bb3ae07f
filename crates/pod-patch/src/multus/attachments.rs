//! NetworkAttachmentDefinition lifecycle.
//!
//! Creates, updates and deletes the definitions owned by an application.
//! Every write is conditioned on the resourceVersion just read and retried on
//! conflict under the same policy as the StatefulSet. A definition that does
//! not carry the application's ownership label is never touched.

use crate::apply::retry_on_conflict;
use crate::backoff::RetryPolicy;
use crate::error::PatchError;
use crds::NetworkAttachmentDefinition;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use workload_client::{ClientError, WorkloadClientTrait};

const KIND: &str = "NetworkAttachmentDefinition";

/// One pending definition write.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentOp {
    /// Definition is missing
    Create {
        /// Definition name
        name: String,
        /// CNI config
        config: Value,
    },
    /// Owned definition exists with a different config
    Update {
        /// Definition name
        name: String,
        /// CNI config
        config: Value,
    },
    /// Owned definition is no longer requested
    Delete {
        /// Definition name
        name: String,
    },
}

impl AttachmentOp {
    /// Definition the operation targets
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. } | Self::Update { name, .. } | Self::Delete { name } => name,
        }
    }
}

/// Definition writes split around the StatefulSet patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentPlan {
    /// Run before patching the StatefulSet
    pub before: Vec<AttachmentOp>,
    /// Deletions of definitions the live Pod template still references,
    /// run once the template no longer does
    pub after: Vec<AttachmentOp>,
}

impl AttachmentPlan {
    /// Whether nothing needs writing
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Compute the definition writes that take `owned` to `desired`.
///
/// Owned definitions still named by `requested` (used without an inline
/// config) are left alone. Orphans referenced by `live_references` are
/// deleted only after the template stops referencing them.
pub fn plan(
    desired: &BTreeMap<String, Value>,
    requested: &BTreeSet<String>,
    owned: &BTreeMap<String, NetworkAttachmentDefinition>,
    live_references: &BTreeSet<String>,
) -> AttachmentPlan {
    let mut plan = AttachmentPlan::default();

    for (name, config) in desired {
        match owned.get(name) {
            None => plan.before.push(AttachmentOp::Create {
                name: name.clone(),
                config: config.clone(),
            }),
            Some(existing) if !existing.config_matches(config) => plan.before.push(AttachmentOp::Update {
                name: name.clone(),
                config: config.clone(),
            }),
            Some(_) => {}
        }
    }

    for name in owned.keys() {
        if desired.contains_key(name) || requested.contains(name) {
            continue;
        }
        let op = AttachmentOp::Delete { name: name.clone() };
        if live_references.contains(name) {
            plan.after.push(op);
        } else {
            plan.before.push(op);
        }
    }

    plan
}

/// Run `ops` in order, continuing past failures. Returns the failed
/// definitions with their errors.
pub async fn execute<C>(
    client: &C,
    app_name: &str,
    ops: &[AttachmentOp],
    policy: &RetryPolicy,
) -> Vec<(String, PatchError)>
where
    C: WorkloadClientTrait + ?Sized,
{
    let mut failures = Vec::new();
    for op in ops {
        let result = match op {
            AttachmentOp::Create { name, config } => create(client, app_name, name, config, policy).await,
            AttachmentOp::Update { name, config } => update(client, app_name, name, config, policy).await,
            AttachmentOp::Delete { name } => delete(client, app_name, name, policy).await,
        };
        if let Err(e) = result {
            warn!("{} {}/{} failed: {}", KIND, client.namespace(), op.name(), e);
            failures.push((op.name().to_string(), e));
        }
    }
    failures
}

/// Fold failures into a single `PartialReconcile` error.
pub fn into_partial(failures: Vec<(String, PatchError)>) -> Result<(), PatchError> {
    if failures.is_empty() {
        return Ok(());
    }
    let (failed, errors) = failures.into_iter().unzip();
    Err(PatchError::PartialReconcile { failed, errors })
}

async fn create<C>(client: &C, app_name: &str, name: &str, config: &Value, policy: &RetryPolicy) -> Result<(), PatchError>
where
    C: WorkloadClientTrait + ?Sized,
{
    let definition = NetworkAttachmentDefinition::owned(name, app_name, config);
    match client.create_network_attachment_definition(&definition).await {
        Ok(_) => {
            info!("Created {} {}/{}", KIND, client.namespace(), name);
            Ok(())
        }
        // Another unit of the same application may have created it first.
        Err(ClientError::AlreadyExists(_)) => update(client, app_name, name, config, policy).await,
        Err(e) => Err(PatchError::from_client(KIND, name, e)),
    }
}

async fn update<C>(client: &C, app_name: &str, name: &str, config: &Value, policy: &RetryPolicy) -> Result<(), PatchError>
where
    C: WorkloadClientTrait + ?Sized,
{
    retry_on_conflict(policy, KIND, name, |_| async move {
        let mut live = client
            .get_network_attachment_definition(name)
            .await
            .map_err(|e| PatchError::from_client(KIND, name, e))?;
        if !live.is_owned_by(app_name) {
            return Err(PatchError::Apply {
                kind: KIND,
                name: name.to_string(),
                source: ClientError::AlreadyExists(format!("{name} exists and is not owned by {app_name}")),
            });
        }
        if live.config_matches(config) {
            debug!("{} {} already up-to-date", KIND, name);
            return Ok(());
        }
        live.spec.config = Some(config.to_string());
        client
            .replace_network_attachment_definition(name, &live)
            .await
            .map_err(|e| PatchError::from_client(KIND, name, e))?;
        info!("Updated {} {}/{}", KIND, client.namespace(), name);
        Ok(())
    })
    .await
}

async fn delete<C>(client: &C, app_name: &str, name: &str, policy: &RetryPolicy) -> Result<(), PatchError>
where
    C: WorkloadClientTrait + ?Sized,
{
    retry_on_conflict(policy, KIND, name, |_| async move {
        let live = match client.get_network_attachment_definition(name).await {
            Ok(live) => live,
            Err(ClientError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(PatchError::from_client(KIND, name, e)),
        };
        if !live.is_owned_by(app_name) {
            debug!("{} {} is not owned by {}, leaving it", KIND, name, app_name);
            return Ok(());
        }
        match client
            .delete_network_attachment_definition(name, live.resource_version().as_deref())
            .await
        {
            Ok(()) | Err(ClientError::NotFound(_)) => {
                info!("Deleted {} {}/{}", KIND, client.namespace(), name);
                Ok(())
            }
            Err(e) => Err(PatchError::from_client(KIND, name, e)),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owned(name: &str, config: &Value) -> (String, NetworkAttachmentDefinition) {
        (name.to_string(), NetworkAttachmentDefinition::owned(name, "upf", config))
    }

    #[test]
    fn test_plan_creates_missing_and_updates_drifted() {
        let desired = BTreeMap::from([
            ("new".to_string(), json!({"type": "macvlan"})),
            ("drifted".to_string(), json!({"type": "bridge"})),
            ("same".to_string(), json!({"type": "sriov"})),
        ]);
        let live = BTreeMap::from([
            owned("drifted", &json!({"type": "macvlan"})),
            owned("same", &json!({"type": "sriov"})),
        ]);

        let plan = plan(&desired, &BTreeSet::new(), &live, &BTreeSet::new());

        assert_eq!(
            plan.before,
            vec![
                AttachmentOp::Update {
                    name: "drifted".into(),
                    config: json!({"type": "bridge"})
                },
                AttachmentOp::Create {
                    name: "new".into(),
                    config: json!({"type": "macvlan"})
                },
            ]
        );
        assert!(plan.after.is_empty());
    }

    #[test]
    fn test_plan_defers_deletion_of_referenced_orphans() {
        let live = BTreeMap::from([owned("gone", &json!({})), owned("in-use", &json!({}))]);
        let references = BTreeSet::from(["in-use".to_string()]);

        let plan = plan(&BTreeMap::new(), &BTreeSet::new(), &live, &references);

        assert_eq!(plan.before, vec![AttachmentOp::Delete { name: "gone".into() }]);
        assert_eq!(plan.after, vec![AttachmentOp::Delete { name: "in-use".into() }]);
    }

    #[test]
    fn test_plan_keeps_owned_definition_still_requested() {
        let live = BTreeMap::from([owned("kept", &json!({}))]);
        let requested = BTreeSet::from(["kept".to_string()]);

        assert!(plan(&BTreeMap::new(), &requested, &live, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_into_partial() {
        assert!(into_partial(Vec::new()).is_ok());
        let err = into_partial(vec![("a".into(), PatchError::InvalidSpec("x".into()))]).unwrap_err();
        assert!(matches!(err, PatchError::PartialReconcile { ref failed, .. } if failed == &["a".to_string()]));
    }
}
