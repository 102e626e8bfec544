//! Controller runtime glue
//!
//! Drives the [`Reconciler`] from a `kube::runtime::Controller` watching all
//! PersistentVolumeClaims plus the PersistentVolumes this controller labels,
//! so drift on a bound volume re-triggers its claim.

use super::Reconciler;
use crate::claim;
use crate::domain::literals::PV_LABEL_SHARE_NAME;
use crate::error::{Error, ErrorAction};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue delay for errors retried with backoff
const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Run the controller until shutdown
pub async fn run(client: Client, reconciler: Arc<Reconciler>) {
    let claims: Api<PersistentVolumeClaim> = Api::all(client.clone());
    let volumes: Api<PersistentVolume> = Api::all(client);

    info!("Starting PersistentVolumeClaim controller");
    Controller::new(claims, watcher::Config::default())
        .watches(
            volumes,
            watcher::Config::default().labels(PV_LABEL_SHARE_NAME),
            claim_for_volume,
        )
        .shutdown_on_signal()
        .run(reconcile_claim, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((claim, _)) => debug!(claim = %claim, "reconcile finished"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;
    info!("Controller stopped");
}

/// Claim a labelled PersistentVolume is bound to
pub fn claim_for_volume(volume: PersistentVolume) -> Option<ObjectRef<PersistentVolumeClaim>> {
    let claim_ref = volume.spec?.claim_ref?;
    let name = claim_ref.name.filter(|n| !n.is_empty())?;
    let namespace = claim_ref.namespace.filter(|ns| !ns.is_empty())?;
    Some(ObjectRef::new(&name).within(&namespace))
}

pub async fn reconcile_claim(
    claim: Arc<PersistentVolumeClaim>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, Error> {
    reconciler.reconcile(&claim::key_of(&claim)).await?;
    Ok(Action::await_change())
}

pub fn error_policy(
    _claim: Arc<PersistentVolumeClaim>,
    error: &Error,
    _reconciler: Arc<Reconciler>,
) -> Action {
    requeue_action(error)
}

/// Map an error's action onto a controller requeue
pub fn requeue_action(error: &Error) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(RETRY_DELAY),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeSpec};

    #[test]
    fn test_claim_for_volume() {
        let volume = PersistentVolume {
            spec: Some(PersistentVolumeSpec {
                claim_ref: Some(ObjectReference {
                    namespace: Some("team".into()),
                    name: Some("data".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let target = claim_for_volume(volume).unwrap();
        assert_eq!(target.name, "data");
        assert_eq!(target.namespace.as_deref(), Some("team"));
    }

    #[test]
    fn test_claim_for_unbound_volume() {
        assert!(claim_for_volume(PersistentVolume::default()).is_none());
    }

    #[test]
    fn test_requeue_action() {
        let err = Error::Conflict {
            kind: "PersistentVolumeClaim".into(),
            name: "team/data".into(),
        };
        assert_eq!(requeue_action(&err), Action::requeue(Duration::from_secs(1)));

        assert_eq!(requeue_action(&Error::Cancelled), Action::requeue(RETRY_DELAY));
        assert_eq!(
            requeue_action(&Error::InvalidShareName("---".into())),
            Action::await_change()
        );
    }
}
