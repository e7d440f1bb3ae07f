//! Workload Kubernetes Client
//!
//! Namespaced access to the Kubernetes objects the pod-patch reconcilers
//! touch: StatefulSets (read and replace), Pods (read) and Multus
//! NetworkAttachmentDefinitions (list, create, replace, delete).
//!
//! # Example
//!
//! ```no_run
//! use workload_client::{WorkloadClient, WorkloadClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WorkloadClient::try_default("my-model", "pod-patch").await?;
//! let statefulset = client.get_statefulset("upf").await?;
//! println!("resourceVersion: {:?}", statefulset.metadata.resource_version);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Error classification**: API statuses map onto `ClientError` variants
//!   (404, 409 conflict vs. already-exists, 401)
//! - **Optimistic concurrency**: replaces carry the caller's resourceVersion
//! - **Mocking**: `MockWorkloadClient` (feature `test-util`) for unit tests

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod workload_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::WorkloadClient;
pub use error::ClientError;
pub use workload_trait::WorkloadClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCall, MockWorkloadClient};
