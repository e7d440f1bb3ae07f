//! HugePages desired-state builder.

use super::quantity::{format_bytes, parse_bytes};
use crate::error::PatchError;
use crate::merge::{ContainerFragment, Ownership, PatchFragment};
use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every volume, mount and resource this module owns
pub const HUGEPAGES_PREFIX: &str = "hugepages-";

/// Supported huge page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PageSize {
    /// 2 MiB pages
    #[serde(rename = "2Mi")]
    TwoMi,
    /// 1 GiB pages
    #[serde(rename = "1Gi")]
    OneGi,
}

impl PageSize {
    /// Page size in bytes
    pub fn bytes(self) -> u128 {
        match self {
            Self::TwoMi => 2 * 1024 * 1024,
            Self::OneGi => 1024 * 1024 * 1024,
        }
    }

    /// Container resource name, e.g. `hugepages-1Gi`
    pub fn resource_name(self) -> String {
        format!("{}{}", HUGEPAGES_PREFIX, self)
    }

    /// Pod volume name, e.g. `hugepages-1gi`
    pub fn volume_name(self) -> String {
        self.resource_name().to_lowercase()
    }

    /// emptyDir medium, e.g. `HugePages-1Gi`
    pub fn medium(self) -> String {
        format!("HugePages-{}", self)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoMi => write!(f, "2Mi"),
            Self::OneGi => write!(f, "1Gi"),
        }
    }
}

impl FromStr for PageSize {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2Mi" => Ok(Self::TwoMi),
            "1Gi" => Ok(Self::OneGi),
            other => Err(PatchError::InvalidSpec(format!("Unsupported huge page size {other}, expected 2Mi or 1Gi"))),
        }
    }
}

/// HugePages to reserve for the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HugePageRequest {
    /// Page size
    pub page_size: PageSize,
    /// Total amount. A bare number counts pages, a quantity with a unit
    /// (`2Gi`, `2048Mi`) counts bytes.
    #[serde(deserialize_with = "string_or_count")]
    pub amount: String,
    /// Where the hugepage-backed volume is mounted in each target container
    pub mount_path: String,
}

fn string_or_count<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Quantity(String),
        Count(u64),
    }

    Ok(match Amount::deserialize(deserializer)? {
        Amount::Quantity(quantity) => quantity,
        Amount::Count(count) => count.to_string(),
    })
}

impl HugePageRequest {
    /// Request `count` pages of `page_size`.
    pub fn pages(page_size: PageSize, count: u64, mount_path: impl Into<String>) -> Self {
        Self {
            page_size,
            amount: count.to_string(),
            mount_path: mount_path.into(),
        }
    }

    /// Request an amount expressed as a quantity.
    pub fn amount(page_size: PageSize, amount: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            page_size,
            amount: amount.into(),
            mount_path: mount_path.into(),
        }
    }

    /// Requested bytes; fails unless positive and a whole number of pages.
    pub fn bytes(&self) -> Result<u128, PatchError> {
        let amount = self.amount.trim();
        let bytes = if !amount.is_empty() && amount.bytes().all(|b| b.is_ascii_digit()) {
            amount
                .parse::<u128>()
                .ok()
                .and_then(|pages| pages.checked_mul(self.page_size.bytes()))
        } else {
            parse_bytes(amount)
        }
        .ok_or_else(|| PatchError::InvalidSpec(format!("Invalid HugePages amount {:?}", self.amount)))?;

        if bytes == 0 {
            return Err(PatchError::InvalidSpec(format!(
                "HugePages amount for {} must be positive",
                self.page_size
            )));
        }
        if bytes % self.page_size.bytes() != 0 {
            return Err(PatchError::InvalidSpec(format!(
                "HugePages amount {} is not a multiple of the {} page size",
                self.amount, self.page_size
            )));
        }
        Ok(bytes)
    }

    /// Canonical resource quantity for this request
    pub fn quantity(&self) -> Result<Quantity, PatchError> {
        Ok(Quantity(format_bytes(self.bytes()?)))
    }
}

/// Ownership of the `hugepages-` prefixed entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct HugePagesOwnership;

impl Ownership for HugePagesOwnership {
    fn owns_volume(&self, name: &str) -> bool {
        name.starts_with(HUGEPAGES_PREFIX)
    }

    fn owns_mount(&self, name: &str) -> bool {
        name.starts_with(HUGEPAGES_PREFIX)
    }

    fn owns_resource(&self, name: &str) -> bool {
        name.starts_with(HUGEPAGES_PREFIX)
    }

    fn canonical_quantity(&self, _name: &str, value: &Quantity) -> Quantity {
        super::quantity::canonical(value)
    }

    /// HugePages are only admitted next to a cpu or memory request or limit.
    fn check_container(&self, container: &Container) -> Result<(), String> {
        let Some(resources) = &container.resources else {
            return Ok(());
        };
        let names = || {
            resources
                .limits
                .iter()
                .chain(resources.requests.iter())
                .flat_map(|map| map.keys())
        };
        if !names().any(|name| name.starts_with(HUGEPAGES_PREFIX)) {
            return Ok(());
        }
        if names().any(|name| name == "cpu" || name == "memory") {
            Ok(())
        } else {
            Err("HugePages require a cpu or memory request or limit".to_string())
        }
    }
}

/// Build the fragment reserving `requests` for every container in `containers`.
pub fn build(requests: &[HugePageRequest], containers: &[String]) -> Result<PatchFragment, PatchError> {
    let mut sizes = BTreeSet::new();
    let mut paths = BTreeSet::new();
    let mut fragment = PatchFragment::default();
    let mut container = ContainerFragment::default();

    for request in requests {
        if !sizes.insert(request.page_size) {
            return Err(PatchError::InvalidSpec(format!(
                "Duplicate HugePages request for page size {}",
                request.page_size
            )));
        }
        if !request.mount_path.starts_with('/') {
            return Err(PatchError::InvalidSpec(format!(
                "HugePages mount path must be absolute, got {:?}",
                request.mount_path
            )));
        }
        if !paths.insert(request.mount_path.as_str()) {
            return Err(PatchError::InvalidSpec(format!(
                "Duplicate HugePages mount path {}",
                request.mount_path
            )));
        }
        let quantity = request.quantity()?;
        let volume_name = request.page_size.volume_name();

        fragment.volumes.push(Volume {
            name: volume_name.clone(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some(request.page_size.medium()),
                size_limit: None,
            }),
            ..Default::default()
        });
        container.volume_mounts.push(VolumeMount {
            name: volume_name,
            mount_path: request.mount_path.clone(),
            ..Default::default()
        });
        container.limits.insert(request.page_size.resource_name(), quantity.clone());
        container.requests.insert(request.page_size.resource_name(), quantity);
    }

    if !requests.is_empty() && containers.is_empty() {
        return Err(PatchError::InvalidSpec("HugePages requested without target containers".to_string()));
    }

    fragment.volumes.sort_by(|a, b| a.name.cmp(&b.name));
    container.volume_mounts.sort_by(|a, b| a.name.cmp(&b.name));
    fragment.containers = containers
        .iter()
        .map(|name| (name.clone(), container.clone()))
        .collect::<BTreeMap<_, _>>();
    Ok(fragment)
}
