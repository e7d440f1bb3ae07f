//! HugePages reservation.

pub mod quantity;
mod reconciler;
pub mod request;

pub use reconciler::KubernetesHugePages;
pub use request::{HUGEPAGES_PREFIX, HugePageRequest, HugePagesOwnership, PageSize};
