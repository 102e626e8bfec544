//! Claim reconciliation
//!
//! - [`dispatcher`]: entry point routing a claim to provisioning or deletion
//! - [`provision`]: finalizer, share, volume and annotation for a live claim
//! - [`deletion`]: share and volume cleanup, then finalizer release
//! - [`outcome`]: outcome classification and metrics
//! - [`runner`]: `kube::runtime::Controller` glue

pub mod deletion;
pub mod dispatcher;
pub mod outcome;
pub mod provision;
pub mod runner;

pub use dispatcher::Reconciler;
pub use outcome::{OutcomeKind, OutcomeRecorder, ReconcileMetrics, ReconcileOutcome};

use crate::claim;
use crate::config::ProvisionerConfig;
use crate::domain::ports::{ClusterStoreRef, EventPublisherRef, ShareServiceRef};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::warn;

/// Collaborators shared by both workflows
#[derive(Clone)]
pub struct Context {
    pub store: ClusterStoreRef,
    pub shares: ShareServiceRef,
    pub events: EventPublisherRef,
    pub config: ProvisionerConfig,
}

impl Context {
    pub async fn normal(&self, reference: &ObjectReference, reason: &str, action: &str, note: String) {
        self.events
            .publish(reference, EventType::Normal, reason, action, Some(note))
            .await;
    }

    pub async fn warning(&self, reference: &ObjectReference, reason: &str, action: &str, note: String) {
        self.events
            .publish(reference, EventType::Warning, reason, action, Some(note))
            .await;
    }

    /// Report an unfixable failure instead of retrying it
    pub async fn absorb_terminal(
        &self,
        reference: &ObjectReference,
        reason: &str,
        action: &str,
        err: Error,
    ) -> OutcomeKind {
        warn!(reason, error = %err, "terminal failure, waiting for the claim to change");
        self.warning(reference, reason, action, err.to_string()).await;
        OutcomeKind::Terminal
    }

    /// Who owns the claim's StorageClass
    pub async fn class_ownership(&self, claim: &PersistentVolumeClaim) -> Result<ClassOwnership> {
        let Some(class_name) = claim::storage_class_name(claim) else {
            return Ok(ClassOwnership::Unset);
        };
        Ok(match self.store.get_storage_class(class_name).await? {
            None => ClassOwnership::Missing,
            Some(class) if class.provisioner == self.config.provisioner => ClassOwnership::Ours,
            Some(_) => ClassOwnership::Foreign,
        })
    }
}

/// Result of looking up a claim's StorageClass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOwnership {
    /// The claim names no StorageClass
    Unset,
    /// The named StorageClass does not exist
    Missing,
    /// Served by another provisioner
    Foreign,
    /// Served by this controller
    Ours,
}

pub(crate) fn claim_reference(claim: &PersistentVolumeClaim) -> ObjectReference {
    claim.object_ref(&())
}
