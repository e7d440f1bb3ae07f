//! Desired-state document.
//!
//! ```yaml
//! networks:
//!   - name: core
//!     attachment: core-net
//!     ips: ["192.168.250.3/24"]
//!     config: {cniVersion: "0.3.1", type: macvlan, master: eth0}
//! netAdminContainers: [upf]
//! hugepages:
//!   - pageSize: 1Gi
//!     amount: 2
//!     mountPath: /dev/hugepages
//! hugepageContainers: [upf]
//! ```

use crate::error::PatcherError;
use pod_patch::{HugePageRequest, NetworkInterfaceSpec};
use serde::Deserialize;
use std::fs;

/// What the unit's StatefulSet should carry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Multus interfaces; absent means Multus is not managed
    pub networks: Option<Vec<NetworkInterfaceSpec>>,
    #[serde(default)]
    pub net_admin_containers: Vec<String>,
    /// HugePages requests; absent means HugePages are not managed
    pub hugepages: Option<Vec<HugePageRequest>>,
    #[serde(default)]
    pub hugepage_containers: Vec<String>,
}

impl DesiredState {
    /// Parse a YAML document
    pub fn from_yaml(path: &str, raw: &str) -> Result<Self, PatcherError> {
        serde_yaml::from_str(raw).map_err(|source| PatcherError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Read and parse the document at `path`
    pub fn load(path: &str) -> Result<Self, PatcherError> {
        let raw = fs::read_to_string(path).map_err(|source| PatcherError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(path, &raw)
    }
}
