//! Reconciliation dispatcher
//!
//! Entry point for one claim identity: reads a fresh snapshot, routes it to
//! provisioning or deletion, bounds the run by the reconcile timeout and the
//! shutdown token, and records the outcome.

use super::outcome::{OutcomeKind, OutcomeRecorder, ReconcileOutcome};
use super::{deletion, provision, Context};
use crate::claim;
use crate::domain::ports::ClaimKey;
use crate::error::{Error, Result};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Reconciles claims by key
pub struct Reconciler {
    ctx: Context,
    recorder: OutcomeRecorder,
    shutdown: CancellationToken,
}

impl Reconciler {
    pub fn new(ctx: Context, recorder: OutcomeRecorder, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            recorder,
            shutdown,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Reconcile one claim and record the outcome.
    ///
    /// Terminal failures come back as `Ok` with [`OutcomeKind::Terminal`];
    /// anything returned as `Err` should be redelivered.
    #[instrument(skip(self), fields(claim = %key))]
    pub async fn reconcile(&self, key: &ClaimKey) -> Result<ReconcileOutcome> {
        let start = Instant::now();
        let result = match self.dispatch_bounded(key).await {
            Err(e) if e.is_terminal() => {
                warn!(error = %e, "terminal failure, not retrying");
                Ok(OutcomeKind::Terminal)
            }
            other => other,
        };

        let kind = match &result {
            Ok(kind) => *kind,
            Err(_) => OutcomeKind::Error,
        };
        let outcome = ReconcileOutcome {
            kind,
            duration: start.elapsed(),
        };
        self.recorder.record(&outcome);

        match result {
            Ok(_) => {
                debug!(outcome = %outcome.kind, elapsed = ?outcome.duration, "reconciled");
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch_bounded(&self, key: &ClaimKey) -> Result<OutcomeKind> {
        let timeout = self.ctx.config.reconcile_timeout;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, self.dispatch(key)) => {
                result.map_err(|_| Error::Timeout(timeout))?
            }
        }
    }

    /// Route a fresh snapshot of `key` to the matching workflow
    pub async fn dispatch(&self, key: &ClaimKey) -> Result<OutcomeKind> {
        let Some(claim) = self.ctx.store.get_claim(key).await? else {
            debug!("claim gone");
            return Ok(OutcomeKind::Skip);
        };

        if claim::is_deleting(&claim) {
            deletion::delete(&self.ctx, claim).await
        } else {
            provision::provision(&self.ctx, claim).await
        }
    }
}
