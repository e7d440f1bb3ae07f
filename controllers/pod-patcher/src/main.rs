//! Pod Patcher
//!
//! One-shot reconciliation for a Juju unit: patches the application's
//! StatefulSet with the Multus networks and HugePages described in a YAML
//! desired-state document, then exits.
//!
//! Usage:
//! - `pod-patcher [desired.yaml]` reconciles (the path may also come from
//!   `POD_PATCH_DESIRED`)
//! - `pod-patcher remove` deletes the NetworkAttachmentDefinitions the
//!   application owns

mod desired;
mod error;

use crate::desired::DesiredState;
use crate::error::PatcherError;
use pod_patch::{KubernetesHugePages, KubernetesMultus, ReconcilerConfig};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use workload_client::{WorkloadClient, WorkloadClientTrait};

#[tokio::main]
async fn main() -> Result<(), PatcherError> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Pod Patcher");

    let config = ReconcilerConfig::from_env()?;
    let argument = env::args().nth(1);

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Application: {}", config.app_name);
    info!("  Max attempts: {}", config.retry.max_attempts);

    let client: Arc<dyn WorkloadClientTrait> =
        Arc::new(WorkloadClient::try_default(&config.namespace, &config.field_manager).await?);

    let result = if argument.as_deref() == Some("remove") {
        remove(client, config).await
    } else {
        let path = env::var("POD_PATCH_DESIRED").ok().or(argument).ok_or_else(|| {
            PatcherError::InvalidConfig(
                "POD_PATCH_DESIRED environment variable or a desired-state path argument is required".to_string(),
            )
        })?;
        let desired = DesiredState::load(&path)?;
        run(client, config, desired).await
    };

    if let Err(e) = &result {
        error!("Pod patch failed: {}", e);
    }
    result
}

/// Reconcile every section present in `desired`.
async fn run(client: Arc<dyn WorkloadClientTrait>, config: ReconcilerConfig, desired: DesiredState) -> Result<(), PatcherError> {
    if let Some(networks) = desired.networks {
        let multus = KubernetesMultus::new(client.clone(), config.clone(), networks, desired.net_admin_containers);
        multus.reconcile().await?;
        info!("Multus configured: {}", multus.is_configured().await?);
    }
    if let Some(requests) = desired.hugepages {
        let hugepages = KubernetesHugePages::new(client, config, requests, desired.hugepage_containers);
        hugepages.reconcile().await?;
        info!("HugePages patched: {}", hugepages.is_patched().await?);
    }
    Ok(())
}

async fn remove(client: Arc<dyn WorkloadClientTrait>, config: ReconcilerConfig) -> Result<(), PatcherError> {
    KubernetesMultus::new(client, config, Vec::new(), Vec::new())
        .remove()
        .await?;
    Ok(())
}
