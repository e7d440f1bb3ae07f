//! Multus secondary networks.

pub mod attachments;
pub mod network;
mod reconciler;

pub use network::{NET_ADMIN, NETWORKS_ANNOTATION, NetworkAnnotation, NetworkInterfaceSpec, MultusOwnership};
pub use reconciler::KubernetesMultus;
