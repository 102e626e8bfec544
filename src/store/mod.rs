//! Cluster store adapters
//!
//! - [`KubeStore`]: the Kubernetes API via kube-rs
//! - [`MemoryStore`]: an in-memory store with API-server write semantics,
//!   used by the workflow tests

pub mod api;
pub mod memory;

pub use api::KubeStore;
pub use memory::MemoryStore;

pub(crate) const CLAIM_KIND: &str = "PersistentVolumeClaim";
pub(crate) const VOLUME_KIND: &str = "PersistentVolume";
