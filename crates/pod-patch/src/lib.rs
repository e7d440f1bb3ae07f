//! Pod template patch reconciliation
//!
//! Idempotently reconciles Multus secondary networks and HugePages onto the
//! Pod template of an application's StatefulSet. Each call reads the cluster,
//! merges the desired fragment into the live template (touching only the keys
//! it owns), and writes only when owned state differs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pod_patch::{HugePageRequest, KubernetesHugePages, KubernetesMultus, NetworkInterfaceSpec, PageSize, ReconcilerConfig};
//! use workload_client::WorkloadClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReconcilerConfig::from_env()?;
//! let client = Arc::new(WorkloadClient::try_default(&config.namespace, &config.field_manager).await?);
//!
//! let multus = KubernetesMultus::new(
//!     client.clone(),
//!     config.clone(),
//!     vec![NetworkInterfaceSpec::new("core", "core-net").with_ips(["192.168.250.3/24"])],
//!     vec!["upf".to_string()],
//! );
//! multus.reconcile().await?;
//!
//! let hugepages = KubernetesHugePages::new(
//!     client,
//!     config,
//!     vec![HugePageRequest::pages(PageSize::OneGi, 2, "/dev/hugepages")],
//!     vec!["upf".to_string()],
//! );
//! hugepages.reconcile().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Pipeline
//!
//! - **Builders** (`multus::network`, `hugepages::request`) turn requests into a [`PatchFragment`]
//! - **Reader** fetches the StatefulSet and its resourceVersion
//! - **Merge** applies the fragment through an [`Ownership`] predicate
//! - **Apply** replaces the StatefulSet, re-running read and merge on conflict
//! - **Attachments** keep NetworkAttachmentDefinitions in step (Multus only)

pub mod apply;
pub mod backoff;
pub mod config;
pub mod error;
pub mod hugepages;
pub mod merge;
pub mod multus;
pub mod reader;

pub use apply::{ApplyOutcome, apply, apply_fragment};
pub use backoff::RetryPolicy;
pub use config::ReconcilerConfig;
pub use error::PatchError;
pub use hugepages::{HugePageRequest, KubernetesHugePages, PageSize};
pub use merge::{ContainerFragment, Merged, Ownership, PatchFragment, merge_template};
pub use multus::{KubernetesMultus, NetworkInterfaceSpec};
pub use reader::{LiveWorkload, read_owned_attachments, read_statefulset};
