//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the reconcile workflows and
//! external systems. Adapters implement them: the Kubernetes API and Azure
//! Files in production, in-memory fakes in tests.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::runtime::events::EventType;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Claim Identity
// =============================================================================

/// Identity of a claim as delivered by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    pub namespace: String,
    pub name: String,
}

impl ClaimKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Claim Patch
// =============================================================================

/// A metadata-only change to a claim.
///
/// Applied as a JSON merge patch that carries the snapshot's
/// `resourceVersion`, so the write fails instead of overwriting when the claim
/// changed after it was read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimPatch {
    /// Replacement finalizer list
    pub finalizers: Option<Vec<String>>,
    /// Annotations to set; other annotations are left alone
    pub annotations: BTreeMap<String, String>,
}

impl ClaimPatch {
    /// Patch replacing the finalizer list
    pub fn finalizers(finalizers: Vec<String>) -> Self {
        Self {
            finalizers: Some(finalizers),
            annotations: BTreeMap::new(),
        }
    }

    /// Patch setting a single annotation
    pub fn annotation(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.into(), value.into());
        Self {
            finalizers: None,
            annotations,
        }
    }

    /// Render as a JSON merge patch conditioned on `resource_version`
    pub fn to_merge_patch(&self, resource_version: Option<&str>) -> serde_json::Value {
        let mut metadata = serde_json::Map::new();
        if let Some(rv) = resource_version {
            metadata.insert("resourceVersion".into(), json!(rv));
        }
        if let Some(finalizers) = &self.finalizers {
            metadata.insert("finalizers".into(), json!(finalizers));
        }
        if !self.annotations.is_empty() {
            metadata.insert("annotations".into(), json!(self.annotations));
        }
        json!({ "metadata": metadata })
    }
}

// =============================================================================
// Cluster Store Port
// =============================================================================

/// Port for the cluster resource store.
///
/// Absent objects are `Ok(None)`; an object deleted between read and write
/// is reported the same way by [`ClusterStore::patch_claim`].
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Read a claim
    async fn get_claim(&self, key: &ClaimKey) -> Result<Option<PersistentVolumeClaim>>;

    /// Apply `patch` against the snapshot it was computed from.
    ///
    /// Fails with `Error::Conflict` when the snapshot is stale. Returns the
    /// updated claim, or `None` if the claim no longer exists.
    async fn patch_claim(
        &self,
        snapshot: &PersistentVolumeClaim,
        patch: ClaimPatch,
    ) -> Result<Option<PersistentVolumeClaim>>;

    /// Read a volume by name
    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;

    /// Create a volume; fails with `Error::ResourceExists` if the name is taken
    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume>;

    /// Delete a volume by name; an absent volume is not an error
    async fn delete_volume(&self, name: &str) -> Result<()>;

    /// Read a StorageClass by name
    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>>;
}

// =============================================================================
// Share Service Port
// =============================================================================

/// Port for the file-share collaborator.
///
/// Both operations are idempotent: ensuring an existing share succeeds
/// without resizing it, deleting an absent share succeeds.
#[async_trait]
pub trait ShareService: Send + Sync {
    /// Create the share if it does not exist
    async fn ensure_share(&self, name: &str, quota_gib: i32) -> Result<()>;

    /// Delete the share if it exists
    async fn delete_share(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Trait for publishing Kubernetes Events.
///
/// Implementations are fire-and-forget: a failed event is logged and never
/// breaks reconciliation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about `reference`
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterStoreRef = Arc<dyn ClusterStore>;
pub type ShareServiceRef = Arc<dyn ShareService>;
pub type EventPublisherRef = Arc<dyn EventPublisher>;
