//! Kubernetes-backed cluster store

use super::{CLAIM_KIND, VOLUME_KIND};
use crate::domain::ports::{ClaimKey, ClaimPatch, ClusterStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// [`ClusterStore`] talking to the API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_claim(&self, key: &ClaimKey) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claims(&key.namespace).get_opt(&key.name).await?)
    }

    async fn patch_claim(
        &self,
        snapshot: &PersistentVolumeClaim,
        patch: ClaimPatch,
    ) -> Result<Option<PersistentVolumeClaim>> {
        let namespace = snapshot.namespace().unwrap_or_default();
        let name = snapshot.name_any();
        let body = patch.to_merge_patch(snapshot.metadata.resource_version.as_deref());

        match self
            .claims(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&body))
            .await
        {
            Ok(updated) => Ok(Some(updated)),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::Conflict {
                kind: CLAIM_KIND.to_string(),
                name: format!("{}/{}", namespace, name),
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace = %namespace, claim = %name, "claim gone before patch");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.volumes().get_opt(name).await?)
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume> {
        match self.volumes().create(&PostParams::default(), volume).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::ResourceExists {
                kind: VOLUME_KIND.to_string(),
                name: volume.name_any(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        match self.volumes().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        Ok(classes.get_opt(name).await?)
    }
}
