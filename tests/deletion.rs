//! Deletion workflow through the dispatcher

mod common;

use azurefile_share_provisioner::claim::has_finalizer;
use azurefile_share_provisioner::domain::literals::{
    reasons, FINALIZER, RETAIN_SHARE_ANNOTATION, SHARE_NAME_ANNOTATION, SHARE_OVERRIDE_ANNOTATION,
};
use assert_matches::assert_matches;
use azurefile_share_provisioner::controller::runner::requeue_action;
use azurefile_share_provisioner::{Error, OutcomeKind, ShareFailure};
use common::*;
use kube::runtime::controller::Action;

/// Provision the default claim and mark it for deletion
async fn provisioned_then_deleted(h: &Harness, c: k8s_openapi::api::core::v1::PersistentVolumeClaim) {
    h.store.insert_claim(c);
    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Success);
    h.store.mark_for_deletion(&key());
    h.events.clear();
}

#[tokio::test]
async fn test_delete_removes_share_volume_and_finalizer() {
    let h = Harness::new();
    provisioned_then_deleted(&h, claim(Some("5Gi"))).await;
    assert!(h.shares.contains("team-data"));

    let outcome = h.reconcile().await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Delete);

    assert!(!h.shares.contains("team-data"));
    assert!(h.store.volumes().is_empty());
    // finalizer gone, so the store removed the claim
    assert!(h.claim().is_none());

    assert_eq!(
        h.events.reasons(),
        vec![
            reasons::CLEANUP_STARTED,
            reasons::SHARE_DELETED,
            reasons::CLEANUP_COMPLETE
        ]
    );
    assert_eq!(h.metrics.count(OutcomeKind::Delete), 1);
}

#[tokio::test]
async fn test_retained_share_is_kept() {
    let h = Harness::new();
    provisioned_then_deleted(
        &h,
        with_annotation(claim(Some("1Gi")), RETAIN_SHARE_ANNOTATION, "true"),
    )
    .await;

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);

    assert!(h.shares.contains("team-data"));
    assert_eq!(h.shares.delete_calls(), 0);
    assert!(h.store.volumes().is_empty());
    assert!(h.claim().is_none());
    assert!(h.events.has_reason(reasons::SHARE_RETAINED));
}

#[tokio::test]
async fn test_retain_needs_literal_true() {
    let h = Harness::new();
    provisioned_then_deleted(
        &h,
        with_annotation(claim(Some("1Gi")), RETAIN_SHARE_ANNOTATION, "yes"),
    )
    .await;

    h.reconcile().await.unwrap();
    assert!(!h.shares.contains("team-data"));
    assert_eq!(h.shares.delete_calls(), 1);
}

#[tokio::test]
async fn test_share_delete_failure_keeps_finalizer() {
    let h = Harness::new();
    provisioned_then_deleted(&h, claim(Some("1Gi"))).await;
    h.shares.fail_next_delete(ShareFailure::Transient);

    let err = h.reconcile().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(h.events.has_reason(reasons::SHARE_ERROR));
    assert!(!h.events.has_reason(reasons::CLEANUP_COMPLETE));

    let stored = h.claim().expect("claim held by finalizer");
    assert!(has_finalizer(&stored));
    assert_eq!(h.store.volumes().len(), 1);

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);
    assert!(h.claim().is_none());
    assert!(h.store.volumes().is_empty());
}

#[tokio::test]
async fn test_rejected_share_delete_is_retried() {
    let h = Harness::new();
    provisioned_then_deleted(&h, claim(Some("1Gi"))).await;
    h.shares.fail_next_delete(ShareFailure::Validation);

    let err = h.reconcile().await.unwrap_err();
    assert_matches!(err, Error::CleanupFailed { .. });
    assert!(err.is_retryable());
    assert_ne!(requeue_action(&err), Action::await_change());
    assert_eq!(h.metrics.count(OutcomeKind::Terminal), 0);
    assert_eq!(h.metrics.count(OutcomeKind::Error), 1);
    assert!(h.events.has_reason(reasons::SHARE_ERROR));

    let stored = h.claim().expect("claim held by finalizer");
    assert!(has_finalizer(&stored));

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);
    assert!(!h.shares.contains("team-data"));
    assert!(h.claim().is_none());
}

#[tokio::test]
async fn test_mismatched_volume_survives_deletion() {
    let h = Harness::new();
    provisioned_then_deleted(&h, claim(Some("1Gi"))).await;

    let mut volume = h.only_volume();
    if let Some(claim_ref) = volume
        .spec
        .as_mut()
        .and_then(|spec| spec.claim_ref.as_mut())
    {
        claim_ref.uid = Some("someone-else".into());
    }
    h.store.insert_volume(volume);

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);
    assert_eq!(h.store.volumes().len(), 1);
    assert_eq!(h.store.volume_deletes(), 0);
    assert!(h.claim().is_none());
}

#[tokio::test]
async fn test_missing_annotation_recomputes_share_name() {
    let h = Harness::new();
    let mut c = with_annotation(claim(Some("1Gi")), SHARE_OVERRIDE_ANNOTATION, "media");
    c.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    h.store.insert_claim(c);
    h.shares.insert_share("media", 1);
    h.store.mark_for_deletion(&key());

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);
    assert!(!h.shares.contains("media"));
    assert!(h.claim().is_none());
}

#[tokio::test]
async fn test_recorded_share_name_wins() {
    let h = Harness::new();
    let mut c = with_annotation(claim(Some("1Gi")), SHARE_NAME_ANNOTATION, "legacy-share");
    c.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    h.store.insert_claim(c);
    h.shares.insert_share("legacy-share", 1);
    h.shares.insert_share("team-data", 1);
    h.store.mark_for_deletion(&key());

    h.reconcile().await.unwrap();
    assert!(!h.shares.contains("legacy-share"));
    assert!(h.shares.contains("team-data"));
}

#[tokio::test]
async fn test_deleted_storage_class_still_cleans_up() {
    let h = Harness::new();
    provisioned_then_deleted(&h, claim(Some("1Gi"))).await;
    h.store.remove_storage_class(CLASS);

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);
    assert!(!h.shares.contains("team-data"));
    assert!(h.store.volumes().is_empty());
}

#[tokio::test]
async fn test_unmanaged_claim_only_releases_finalizer() {
    let h = Harness::new();
    h.store
        .insert_storage_class(storage_class("other", "disk.csi.azure.com"));
    let mut c = with_class(claim(Some("1Gi")), Some("other"));
    c.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    h.store.insert_claim(c);
    h.shares.insert_share("team-data", 1);
    h.store.mark_for_deletion(&key());

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Skip);
    assert!(h.claim().is_none());
    assert_eq!(h.shares.delete_calls(), 0);
    assert!(h.shares.contains("team-data"));
}

#[tokio::test]
async fn test_deleting_claim_without_our_finalizer() {
    let h = Harness::new();
    let mut c = claim(Some("1Gi"));
    c.metadata.finalizers = Some(vec!["kubernetes.io/pvc-protection".to_string()]);
    h.store.insert_claim(c);
    h.store.mark_for_deletion(&key());

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Skip);
    assert_eq!(h.store.claim_patches(), 0);
    assert_eq!(h.shares.delete_calls(), 0);
}

#[tokio::test]
async fn test_other_finalizers_survive_cleanup() {
    let h = Harness::new();
    let mut c = claim(Some("1Gi"));
    c.metadata.finalizers = Some(vec!["kubernetes.io/pvc-protection".to_string()]);
    provisioned_then_deleted(&h, c).await;

    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Delete);
    let stored = h.claim().expect("held by the other finalizer");
    assert_eq!(
        stored.metadata.finalizers.unwrap(),
        vec!["kubernetes.io/pvc-protection".to_string()]
    );

    // re-entrant: nothing left to do
    assert_eq!(h.reconcile().await.unwrap().kind, OutcomeKind::Skip);
}
