//! Custom Resource Definitions
//!
//! Kubernetes custom resource types that the pod-patch reconcilers read and
//! write but do not define themselves. The CRDs are installed by the
//! platform (e.g. Multus CNI), so no schema generation binary is shipped here.

pub mod network_attachment_definition;

pub use network_attachment_definition::*;
