//! PersistentVolume construction and matching
//!
//! [`build_volume`] deterministically derives the PersistentVolume that binds
//! a claim to its Azure File share. [`volume_matches`] decides whether an
//! existing PersistentVolume is the one a claim expects; provisioning only
//! reuses, and deletion only removes, a volume that matches.

use crate::claim;
use crate::domain::literals::{
    ATTR_RESOURCE_GROUP, ATTR_SERVER, ATTR_SHARE_NAME, ATTR_STORAGE_ACCOUNT,
    AZURE_FILE_CSI_DRIVER, PV_ANNOTATION_VOLUME_HANDLE, PV_LABEL_CLAIM_NAME,
    PV_LABEL_CLAIM_NAMESPACE, PV_LABEL_SHARE_NAME, RECLAIM_POLICY_DELETE, STORAGE_RESOURCE,
};
use crate::error::{Error, Result};
use crate::naming;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Where the share lives in Azure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLocation {
    pub resource_group: String,
    pub storage_account: String,
    pub server: String,
}

impl ShareLocation {
    /// CSI volume handle for `share_name`
    pub fn volume_handle(&self, share_name: &str) -> String {
        format!(
            "{}#{}#{}",
            self.resource_group, self.storage_account, share_name
        )
    }

    /// Name of the PersistentVolume binding `claim` to `share_name`
    pub fn volume_name_for(&self, claim: &PersistentVolumeClaim, share_name: &str) -> String {
        naming::volume_name(
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            claim.metadata.name.as_deref().unwrap_or_default(),
            share_name,
            &self.storage_account,
            &self.resource_group,
            claim.metadata.uid.as_deref().unwrap_or_default(),
        )
    }
}

/// Build the PersistentVolume binding `claim` to `share_name`.
///
/// Same inputs, same object. Fails with `Error::InvalidVolume` when the claim
/// identity, the storage request or the share location is incomplete.
pub fn build_volume(
    claim: &PersistentVolumeClaim,
    share_name: &str,
    location: &ShareLocation,
) -> Result<PersistentVolume> {
    if share_name.is_empty()
        || location.resource_group.is_empty()
        || location.storage_account.is_empty()
    {
        return Err(Error::InvalidVolume(
            "share name, resource group and storage account are required".into(),
        ));
    }

    let (namespace, name, uid) = match (
        claim.metadata.namespace.as_deref(),
        claim.metadata.name.as_deref(),
        claim.metadata.uid.as_deref(),
    ) {
        (Some(ns), Some(n), Some(u)) if !ns.is_empty() && !n.is_empty() && !u.is_empty() => {
            (ns, n, u)
        }
        _ => {
            return Err(Error::InvalidVolume(
                "claim namespace, name and uid are required".into(),
            ))
        }
    };

    let storage = claim::storage_request(claim)
        .cloned()
        .ok_or_else(|| Error::InvalidVolume(format!("{}/{} has no storage request", namespace, name)))?;

    let volume_handle = location.volume_handle(share_name);
    let spec = claim.spec.as_ref();

    let labels = BTreeMap::from([
        (PV_LABEL_CLAIM_NAMESPACE.to_string(), namespace.to_string()),
        (PV_LABEL_CLAIM_NAME.to_string(), name.to_string()),
        (PV_LABEL_SHARE_NAME.to_string(), share_name.to_string()),
    ]);
    let annotations = BTreeMap::from([(
        PV_ANNOTATION_VOLUME_HANDLE.to_string(),
        volume_handle.clone(),
    )]);
    let attributes = BTreeMap::from([
        (ATTR_RESOURCE_GROUP.to_string(), location.resource_group.clone()),
        (ATTR_STORAGE_ACCOUNT.to_string(), location.storage_account.clone()),
        (ATTR_SHARE_NAME.to_string(), share_name.to_string()),
        (ATTR_SERVER.to_string(), location.server.clone()),
    ]);

    Ok(PersistentVolume {
        metadata: ObjectMeta {
            name: Some(location.volume_name_for(claim, share_name)),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(BTreeMap::from([(STORAGE_RESOURCE.to_string(), storage)])),
            access_modes: spec.and_then(|s| s.access_modes.clone()),
            persistent_volume_reclaim_policy: Some(RECLAIM_POLICY_DELETE.to_string()),
            storage_class_name: spec.and_then(|s| s.storage_class_name.clone()),
            claim_ref: Some(ObjectReference {
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            }),
            csi: Some(CSIPersistentVolumeSource {
                driver: AZURE_FILE_CSI_DRIVER.to_string(),
                volume_handle,
                volume_attributes: Some(attributes),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Whether `volume` is bound to exactly this claim and share.
///
/// Compares the claim reference (uid, namespace, name) and the stored share
/// name attribute; anything else about the volume is ignored.
pub fn volume_matches(
    volume: &PersistentVolume,
    claim: &PersistentVolumeClaim,
    share_name: &str,
) -> bool {
    let Some(spec) = volume.spec.as_ref() else {
        return false;
    };
    let Some(claim_ref) = spec.claim_ref.as_ref() else {
        return false;
    };

    let meta = &claim.metadata;
    if claim_ref.uid.is_none()
        || claim_ref.uid != meta.uid
        || claim_ref.namespace != meta.namespace
        || claim_ref.name != meta.name
    {
        return false;
    }

    spec.csi
        .as_ref()
        .and_then(|csi| csi.volume_attributes.as_ref())
        .and_then(|attrs| attrs.get(ATTR_SHARE_NAME))
        .is_some_and(|stored| stored == share_name)
}
