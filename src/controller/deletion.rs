//! Deletion workflow
//!
//! Runs once a claim carries a deletion marker. The finalizer is released
//! only after the share (unless retained) and the matching PersistentVolume
//! are gone; any failure before that leaves it in place for the next attempt.
//! Every failure is retried, including ones that would be terminal during
//! provisioning, so a deleting claim is never parked behind its finalizer.

use super::{claim_reference, ClassOwnership, Context, OutcomeKind};
use crate::binding;
use crate::claim;
use crate::domain::literals::{actions, reasons};
use crate::domain::ports::{ClaimKey, ClaimPatch};
use crate::error::{Error, Result};
use crate::naming;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

#[instrument(skip_all, fields(namespace = ?claim.metadata.namespace, claim = %claim.name_any()))]
pub async fn delete(ctx: &Context, claim: PersistentVolumeClaim) -> Result<OutcomeKind> {
    let key = claim::key_of(&claim);
    finalize(ctx, claim).await.map_err(|e| keep_retrying(&key, e))
}

fn keep_retrying(key: &ClaimKey, e: Error) -> Error {
    if e.is_terminal() {
        Error::CleanupFailed {
            claim: key.to_string(),
            source: Box::new(e),
        }
    } else {
        e
    }
}

async fn finalize(ctx: &Context, claim: PersistentVolumeClaim) -> Result<OutcomeKind> {
    if !claim::has_finalizer(&claim) {
        debug!("no finalizer of ours, nothing to release");
        return Ok(OutcomeKind::Skip);
    }

    let managed = match ctx.class_ownership(&claim).await? {
        ClassOwnership::Ours => true,
        // Class deleted first: our finalizer is the only evidence left
        ClassOwnership::Missing => true,
        ClassOwnership::Unset | ClassOwnership::Foreign => false,
    };
    if !managed {
        debug!("not managed, releasing finalizer without cleanup");
        release_finalizer(ctx, &claim).await?;
        return Ok(OutcomeKind::Skip);
    }

    let reference = claim_reference(&claim);
    match resolve_share_name(&claim) {
        Some(share_name) => cleanup(ctx, &reference, &claim, &share_name).await?,
        None => warn!("no share name can be derived, no share to clean up"),
    }

    ctx.normal(
        &reference,
        reasons::CLEANUP_COMPLETE,
        actions::DELETE,
        "Cleanup complete".to_string(),
    )
    .await;
    release_finalizer(ctx, &claim).await?;
    Ok(OutcomeKind::Delete)
}

/// Recorded share name, or the one provisioning would have computed
pub fn resolve_share_name(claim: &PersistentVolumeClaim) -> Option<String> {
    if let Some(recorded) = claim::recorded_share_name(claim) {
        return Some(recorded.to_string());
    }
    naming::compute_share_name(
        &claim.namespace().unwrap_or_default(),
        &claim.name_any(),
        claim::share_override(claim),
    )
    .ok()
}

async fn cleanup(
    ctx: &Context,
    reference: &ObjectReference,
    claim: &PersistentVolumeClaim,
    share_name: &str,
) -> Result<()> {
    info!(share = %share_name, "cleanup started");
    ctx.normal(
        reference,
        reasons::CLEANUP_STARTED,
        actions::DELETE,
        format!("Cleanup started for Azure File share {}", share_name),
    )
    .await;

    if claim::retains_share(claim) {
        ctx.normal(
            reference,
            reasons::SHARE_RETAINED,
            actions::DELETE,
            format!("Azure File share {} retained", share_name),
        )
        .await;
    } else {
        if let Err(e) = ctx.shares.delete_share(share_name).await {
            ctx.warning(
                reference,
                reasons::SHARE_ERROR,
                actions::DELETE,
                format!("Failed to delete Azure File share {}: {}", share_name, e),
            )
            .await;
            return Err(e);
        }
        ctx.normal(
            reference,
            reasons::SHARE_DELETED,
            actions::DELETE,
            format!("Azure File share {} deleted", share_name),
        )
        .await;
    }

    let volume_name = ctx
        .config
        .share_location()
        .volume_name_for(claim, share_name);
    match ctx.store.get_volume(&volume_name).await? {
        Some(volume) if binding::volume_matches(&volume, claim, share_name) => {
            ctx.store.delete_volume(&volume_name).await?;
            info!(volume = %volume_name, "deleted PersistentVolume");
        }
        Some(_) => {
            warn!(volume = %volume_name, "PersistentVolume belongs to another claim, leaving it");
        }
        None => debug!(volume = %volume_name, "PersistentVolume already absent"),
    }
    Ok(())
}

async fn release_finalizer(ctx: &Context, claim: &PersistentVolumeClaim) -> Result<()> {
    if let Some(finalizers) = claim::finalizers_without_ours(claim) {
        ctx.store
            .patch_claim(claim, ClaimPatch::finalizers(finalizers))
            .await?;
        debug!("finalizer released");
    }
    Ok(())
}
