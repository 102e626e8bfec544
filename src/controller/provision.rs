//! Provisioning workflow
//!
//! Brings a live, managed claim to its provisioned state:
//!
//! 1. finalizer present
//! 2. share name and quota derived from the claim
//! 3. share ensured (never resized)
//! 4. PersistentVolume created, or an existing one confirmed to match
//! 5. share name recorded on the claim
//!
//! Every step checks before it writes, so re-running on a provisioned claim
//! issues no claim patches and creates nothing.

use super::{claim_reference, ClassOwnership, Context, OutcomeKind};
use crate::binding;
use crate::claim;
use crate::domain::literals::{actions, reasons, SHARE_NAME_ANNOTATION};
use crate::domain::ports::ClaimPatch;
use crate::error::{Error, Result};
use crate::naming;
use crate::store::VOLUME_KIND;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use kube::ResourceExt;
use tracing::{debug, info, instrument};

/// Run provisioning against `claim`, a fresh snapshot without deletion marker
#[instrument(skip_all, fields(namespace = ?claim.metadata.namespace, claim = %claim.name_any()))]
pub async fn provision(ctx: &Context, claim: PersistentVolumeClaim) -> Result<OutcomeKind> {
    match ctx.class_ownership(&claim).await? {
        ClassOwnership::Ours => {}
        other => {
            debug!(class = ?other, "not managed, skipping");
            return Ok(OutcomeKind::Skip);
        }
    }

    let reference = claim_reference(&claim);
    let mut claim = claim;

    if let Some(finalizers) = claim::finalizers_with_ours(&claim) {
        match ctx
            .store
            .patch_claim(&claim, ClaimPatch::finalizers(finalizers))
            .await?
        {
            Some(updated) => claim = updated,
            None => return Ok(OutcomeKind::Skip),
        }
        debug!("finalizer added");
    }

    let namespace = claim.namespace().unwrap_or_default();
    let share_name = match naming::compute_share_name(
        &namespace,
        &claim.name_any(),
        claim::share_override(&claim),
    ) {
        Ok(name) => name,
        Err(e) => {
            return Ok(ctx
                .absorb_terminal(&reference, reasons::SHARE_NAME_INVALID, actions::PROVISION, e)
                .await)
        }
    };

    let quota_gib = match claim::quota_gib(&claim) {
        Ok(quota) => quota,
        Err(e) => {
            return Ok(ctx
                .absorb_terminal(&reference, reasons::PVC_INVALID, actions::PROVISION, e)
                .await)
        }
    };

    ctx.normal(
        &reference,
        reasons::SHARE_ENSURING,
        actions::PROVISION,
        format!("Ensuring Azure File share {} ({} GiB)", share_name, quota_gib),
    )
    .await;
    if let Err(e) = ctx.shares.ensure_share(&share_name, quota_gib).await {
        if e.is_terminal() {
            return Ok(ctx
                .absorb_terminal(&reference, reasons::SHARE_VALIDATION, actions::PROVISION, e)
                .await);
        }
        ctx.warning(
            &reference,
            reasons::SHARE_ERROR,
            actions::PROVISION,
            format!("Failed to ensure Azure File share {}: {}", share_name, e),
        )
        .await;
        return Err(e);
    }
    ctx.normal(
        &reference,
        reasons::SHARE_READY,
        actions::PROVISION,
        format!("Azure File share {} is ready", share_name),
    )
    .await;

    let volume = match binding::build_volume(&claim, &share_name, &ctx.config.share_location()) {
        Ok(volume) => volume,
        Err(e) => {
            return Ok(ctx
                .absorb_terminal(&reference, reasons::PV_BUILD_ERROR, actions::PROVISION, e)
                .await)
        }
    };
    ensure_volume(ctx, &reference, &claim, &share_name, &volume).await?;

    if claim::recorded_share_name(&claim) != Some(share_name.as_str()) {
        ctx.store
            .patch_claim(&claim, ClaimPatch::annotation(SHARE_NAME_ANNOTATION, &share_name))
            .await?;
        debug!(share = %share_name, "share name recorded");
    }

    Ok(OutcomeKind::Success)
}

/// Create `expected`, or confirm the object already holding its name matches
async fn ensure_volume(
    ctx: &Context,
    reference: &ObjectReference,
    claim: &PersistentVolumeClaim,
    share_name: &str,
    expected: &PersistentVolume,
) -> Result<()> {
    let name = expected.name_any();

    let existing = match ctx.store.get_volume(&name).await? {
        Some(existing) => existing,
        None => match ctx.store.create_volume(expected).await {
            Ok(_) => {
                info!(volume = %name, share = %share_name, "created PersistentVolume");
                ctx.normal(
                    reference,
                    reasons::PV_CREATED,
                    actions::PROVISION,
                    format!("Created PersistentVolume {}", name),
                )
                .await;
                return Ok(());
            }
            // Lost a create race; judge the winner like any existing object
            Err(Error::ResourceExists { .. }) => {
                ctx.store.get_volume(&name).await?.ok_or(Error::ResourceExists {
                    kind: VOLUME_KIND.to_string(),
                    name: name.clone(),
                })?
            }
            Err(e) => return Err(e),
        },
    };

    if !binding::volume_matches(&existing, claim, share_name) {
        ctx.warning(
            reference,
            reasons::PV_MISMATCH,
            actions::PROVISION,
            format!(
                "PersistentVolume {} does not match the expected claim or share",
                name
            ),
        )
        .await;
        return Err(Error::VolumeMismatch {
            volume: name,
            claim: claim::key_of(claim).to_string(),
            share: share_name.to_string(),
        });
    }

    debug!(volume = %name, "PersistentVolume already exists");
    ctx.normal(
        reference,
        reasons::PV_ALREADY_EXISTS,
        actions::PROVISION,
        format!("PersistentVolume {} already exists", name),
    )
    .await;
    Ok(())
}
