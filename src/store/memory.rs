//! In-memory cluster store
//!
//! Mimics the API-server behavior the workflows rely on: resourceVersion
//! preconditions on claim patches, 409 on duplicate volume names, and
//! finalizer-gated removal of claims marked for deletion.

use super::{CLAIM_KIND, VOLUME_KIND};
use crate::claim;
use crate::domain::ports::{ClaimKey, ClaimPatch, ClusterStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct State {
    claims: BTreeMap<ClaimKey, PersistentVolumeClaim>,
    volumes: BTreeMap<String, PersistentVolume>,
    classes: BTreeMap<String, StorageClass>,
    version: u64,
    claim_patches: usize,
    volume_deletes: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Store `claim`, or drop it if deleting with no finalizers left
    fn settle_claim(&mut self, key: ClaimKey, claim: PersistentVolumeClaim) {
        if claim::is_deleting(&claim) && claim.finalizers().is_empty() {
            self.claims.remove(&key);
        } else {
            self.claims.insert(key, claim);
        }
    }
}

/// [`ClusterStore`] held in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Seeding =====

    /// Insert or replace a claim, assigning a fresh resourceVersion
    pub fn insert_claim(&self, mut claim: PersistentVolumeClaim) {
        let mut state = self.state.lock();
        claim.metadata.resource_version = Some(state.next_version());
        let key = claim::key_of(&claim);
        state.claims.insert(key, claim);
    }

    pub fn insert_volume(&self, mut volume: PersistentVolume) {
        let mut state = self.state.lock();
        volume.metadata.resource_version = Some(state.next_version());
        let name = volume.metadata.name.clone().unwrap_or_default();
        state.volumes.insert(name, volume);
    }

    pub fn insert_storage_class(&self, class: StorageClass) {
        let name = class.metadata.name.clone().unwrap_or_default();
        self.state.lock().classes.insert(name, class);
    }

    pub fn remove_storage_class(&self, name: &str) {
        self.state.lock().classes.remove(name);
    }

    /// Mutate a stored claim the way another writer would
    pub fn update_claim(&self, key: &ClaimKey, f: impl FnOnce(&mut PersistentVolumeClaim)) {
        let mut state = self.state.lock();
        let Some(mut claim) = state.claims.get(key).cloned() else {
            return;
        };
        f(&mut claim);
        claim.metadata.resource_version = Some(state.next_version());
        state.settle_claim(key.clone(), claim);
    }

    /// Set the deletion marker; a claim without finalizers disappears at once
    pub fn mark_for_deletion(&self, key: &ClaimKey) {
        self.update_claim(key, |claim| {
            claim.metadata.deletion_timestamp = Some(Time(Utc::now()));
        });
    }

    // ===== Inspection =====

    pub fn claim(&self, key: &ClaimKey) -> Option<PersistentVolumeClaim> {
        self.state.lock().claims.get(key).cloned()
    }

    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.state.lock().volumes.get(name).cloned()
    }

    pub fn volumes(&self) -> Vec<PersistentVolume> {
        self.state.lock().volumes.values().cloned().collect()
    }

    /// Number of claim patches applied
    pub fn claim_patches(&self) -> usize {
        self.state.lock().claim_patches
    }

    /// Number of volumes actually removed
    pub fn volume_deletes(&self) -> usize {
        self.state.lock().volume_deletes
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_claim(&self, key: &ClaimKey) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claim(key))
    }

    async fn patch_claim(
        &self,
        snapshot: &PersistentVolumeClaim,
        patch: ClaimPatch,
    ) -> Result<Option<PersistentVolumeClaim>> {
        let key = claim::key_of(snapshot);
        let mut state = self.state.lock();

        let Some(mut current) = state.claims.get(&key).cloned() else {
            return Ok(None);
        };

        if let Some(expected) = snapshot.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(expected) {
                return Err(Error::Conflict {
                    kind: CLAIM_KIND.to_string(),
                    name: key.to_string(),
                });
            }
        }

        if let Some(finalizers) = patch.finalizers {
            current.metadata.finalizers = Some(finalizers);
        }
        if !patch.annotations.is_empty() {
            current
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(patch.annotations);
        }
        current.metadata.resource_version = Some(state.next_version());
        state.claim_patches += 1;

        state.settle_claim(key, current.clone());
        Ok(Some(current))
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.volume(name))
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume> {
        let name = volume
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidVolume("volume name required".into()))?;

        let mut state = self.state.lock();
        if state.volumes.contains_key(&name) {
            return Err(Error::ResourceExists {
                kind: VOLUME_KIND.to_string(),
                name,
            });
        }

        let mut created = volume.clone();
        created.metadata.resource_version = Some(state.next_version());
        state.volumes.insert(name, created.clone());
        Ok(created)
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.volumes.remove(name).is_some() {
            state.volume_deletes += 1;
        }
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        Ok(self.state.lock().classes.get(name).cloned())
    }
}
