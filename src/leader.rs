//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs the
//! controller, which is what keeps reconciles of one claim from running on
//! two replicas at once.
//!
//! # Atomicity
//!
//! Renewals and takeovers replace the Lease with the resourceVersion that was
//! read. If another candidate wrote in between, the replace fails with 409
//! and this candidate keeps waiting.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lease name used unless configured otherwise
pub const DEFAULT_LEASE_NAME: &str = "azurefile-provisioner-leader";

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Leadership is given up when no renewal succeeded for this long
const RENEW_DEADLINE: Duration = Duration::from_secs(10);

/// Which Lease to compete for, and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderConfig {
    pub lease_name: String,
    pub namespace: String,
    pub identity: String,
}

/// What a candidate should do with the Lease it just read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No Lease yet
    Create,
    /// We hold it
    Renew,
    /// The holder let it expire
    TakeOver { transitions: i32 },
    /// Someone else holds a live Lease
    Wait { holder: String },
}

/// Decide how `identity` may act on `existing` at `now`
pub fn decide(existing: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = existing else {
        return LeaseDecision::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|h| !h.is_empty());

    if holder == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (holder, renew_time, duration_secs) {
        (None, _, _) => true,
        (Some(_), Some(renewed), Some(duration)) => {
            now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    };

    match holder {
        Some(holder) if !expired => LeaseDecision::Wait {
            holder: holder.to_string(),
        },
        _ => LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        },
    }
}

/// Lease naming `config.identity` as holder from `now`
pub fn held_lease(
    config: &LeaderConfig,
    lease_duration: Duration,
    resource_version: Option<String>,
    transitions: i32,
    now: DateTime<Utc>,
) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(config.lease_name.clone()),
            namespace: Some(config.namespace.clone()),
            resource_version,
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(config.identity.clone()),
            lease_duration_seconds: Some(lease_duration.as_secs() as i32),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }),
    }
}

/// Competes for the Lease and keeps it renewed once held
pub struct LeaderElector {
    client: Client,
    config: LeaderConfig,
}

impl LeaderElector {
    pub fn new(client: Client, config: LeaderConfig) -> Self {
        Self { client, config }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    /// Wait until the Lease is ours, or fail with `Cancelled` on shutdown
    pub async fn acquire(self: Arc<Self>, shutdown: &CancellationToken) -> Result<LeaderGuard> {
        info!(
            identity = %self.config.identity,
            lease = %self.config.lease_name,
            namespace = %self.config.namespace,
            "Waiting for leadership"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.config.identity, "Leadership acquired");
                    return Ok(self.guard());
                }
                Ok(false) => debug!(identity = %self.config.identity, "Lease held elsewhere"),
                Err(e) => warn!(
                    identity = %self.config.identity,
                    error = %e,
                    "Failed to acquire lease, retrying"
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }
    }

    fn guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    /// One compare-and-write round against the Lease
    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let api = self.api();
        let now = Utc::now();
        let existing = api.get_opt(&self.config.lease_name).await?;

        let write = match decide(existing.as_ref(), &self.config.identity, now) {
            LeaseDecision::Wait { holder } => {
                debug!(holder = %holder, "Lease not expired");
                return Ok(false);
            }
            LeaseDecision::Create => {
                let lease = held_lease(&self.config, LEASE_DURATION, None, 0, now);
                api.create(&PostParams::default(), &lease).await.map(|_| ())
            }
            LeaseDecision::Renew => {
                let mut lease = existing.unwrap_or_default();
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                api.replace(&self.config.lease_name, &PostParams::default(), &lease)
                    .await
                    .map(|_| ())
            }
            LeaseDecision::TakeOver { transitions } => {
                let resource_version = existing.and_then(|l| l.metadata.resource_version);
                let lease =
                    held_lease(&self.config, LEASE_DURATION, resource_version, transitions, now);
                api.replace(&self.config.lease_name, &PostParams::default(), &lease)
                    .await
                    .map(|_| ())
            }
        };

        match write {
            Ok(()) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.config.identity, "Lease changed underneath, lost the race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewed = Instant::now();
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewed = Instant::now(),
                Ok(false) => {
                    warn!(identity = %self.config.identity, "Lease taken by another candidate");
                    break;
                }
                Err(e) if last_renewed.elapsed() < RENEW_DEADLINE => {
                    warn!(identity = %self.config.identity, error = %e, "Lease renewal failed");
                }
                Err(e) => {
                    warn!(
                        identity = %self.config.identity,
                        error = %e,
                        "Lease renewal deadline passed"
                    );
                    break;
                }
            }
        }
        let _ = lost_tx.send(());
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release(&self) -> Result<()> {
        let api = self.api();
        let Some(lease) = api.get_opt(&self.config.lease_name).await? else {
            return Ok(());
        };
        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.config.identity.as_str()) {
            debug!(identity = %self.config.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let patch = json!({
            "metadata": { "resourceVersion": lease.metadata.resource_version },
            "spec": {
                "holderIdentity": null,
                "renewTime": MicroTime(Utc::now() - chrono::Duration::seconds(60)),
            }
        });
        api.patch(
            &self.config.lease_name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(identity = %self.config.identity, "Lease released");
        Ok(())
    }
}

/// Held leadership; renewal stops when the guard is dropped
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolves once the Lease can no longer be renewed
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Stop renewing and hand the Lease back
    pub async fn release(self) -> Result<()> {
        self.renewal_task.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LeaderConfig {
        LeaderConfig {
            lease_name: DEFAULT_LEASE_NAME.into(),
            namespace: "kube-system".into(),
            identity: "provisioner-0".into(),
        }
    }

    fn lease(holder: Option<&str>, renewed_secs_ago: i64, transitions: i32) -> Lease {
        let renewed = Utc::now() - chrono::Duration::seconds(renewed_secs_ago);
        let mut lease = held_lease(&config(), LEASE_DURATION, Some("7".into()), transitions, renewed);
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = holder.map(str::to_string);
        }
        lease
    }

    #[test]
    fn test_no_lease_is_created() {
        assert_eq!(decide(None, "provisioner-0", Utc::now()), LeaseDecision::Create);
    }

    #[test]
    fn test_own_lease_is_renewed() {
        let existing = lease(Some("provisioner-0"), 100, 3);
        assert_eq!(
            decide(Some(&existing), "provisioner-0", Utc::now()),
            LeaseDecision::Renew
        );
    }

    #[test]
    fn test_live_foreign_lease_waits() {
        let existing = lease(Some("provisioner-1"), 1, 0);
        assert_eq!(
            decide(Some(&existing), "provisioner-0", Utc::now()),
            LeaseDecision::Wait {
                holder: "provisioner-1".into()
            }
        );
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let existing = lease(Some("provisioner-1"), 60, 4);
        assert_eq!(
            decide(Some(&existing), "provisioner-0", Utc::now()),
            LeaseDecision::TakeOver { transitions: 5 }
        );
    }

    #[test]
    fn test_released_lease_is_taken_over() {
        let existing = lease(None, 0, 1);
        assert_eq!(
            decide(Some(&existing), "provisioner-0", Utc::now()),
            LeaseDecision::TakeOver { transitions: 2 }
        );

        let existing = lease(Some(""), 0, 1);
        assert_eq!(
            decide(Some(&existing), "provisioner-0", Utc::now()),
            LeaseDecision::TakeOver { transitions: 2 }
        );
    }

    #[test]
    fn test_held_lease() {
        let now = Utc::now();
        let lease = held_lease(&config(), LEASE_DURATION, Some("42".into()), 2, now);

        assert_eq!(lease.metadata.name.as_deref(), Some(DEFAULT_LEASE_NAME));
        assert_eq!(lease.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("42"));

        let spec = lease.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("provisioner-0"));
        assert_eq!(spec.lease_duration_seconds, Some(15));
        assert_eq!(spec.lease_transitions, Some(2));
        assert_eq!(spec.renew_time, Some(MicroTime(now)));
    }
}
