//! Reconcile outcome classification and metrics

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// How a single reconcile invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Provisioning completed
    Success,
    /// Nothing to do: claim gone or not ours
    Skip,
    /// Cleanup completed and the finalizer released
    Delete,
    /// Unfixable input, absorbed and reported as an event
    Terminal,
    /// Failed and will be redelivered
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Skip => "skip",
            OutcomeKind::Delete => "delete",
            OutcomeKind::Terminal => "terminal",
            OutcomeKind::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one invocation and how long it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub kind: OutcomeKind,
    pub duration: Duration,
}

impl ReconcileOutcome {
    pub fn new(kind: OutcomeKind) -> Self {
        Self {
            kind,
            duration: Duration::ZERO,
        }
    }
}

/// Prometheus collectors for reconcile outcomes
#[derive(Clone)]
pub struct ReconcileMetrics {
    total: IntCounterVec,
    duration: HistogramVec,
}

impl ReconcileMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let total = IntCounterVec::new(
            Opts::new("reconcile_total", "Reconcile invocations by result"),
            &["result"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Reconcile duration in seconds by result",
            ),
            &["result"],
        )?;
        Ok(Self { total, duration })
    }

    /// Register with `registry`; an already-registered collector is fine
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        let collectors: [Box<dyn prometheus::core::Collector>; 2] = [
            Box::new(self.total.clone()),
            Box::new(self.duration.clone()),
        ];
        for collector in collectors {
            match registry.register(collector) {
                Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn observe(&self, outcome: &ReconcileOutcome) {
        let label = outcome.kind.as_str();
        self.total.with_label_values(&[label]).inc();
        self.duration
            .with_label_values(&[label])
            .observe(outcome.duration.as_secs_f64());
    }

    pub fn count(&self, kind: OutcomeKind) -> u64 {
        self.total.with_label_values(&[kind.as_str()]).get()
    }

    pub fn duration_samples(&self, kind: OutcomeKind) -> u64 {
        self.duration
            .with_label_values(&[kind.as_str()])
            .get_sample_count()
    }
}

/// Records outcomes; a no-op when metrics are disabled
#[derive(Clone, Default)]
pub struct OutcomeRecorder {
    metrics: Option<ReconcileMetrics>,
}

impl OutcomeRecorder {
    pub fn new(metrics: Option<ReconcileMetrics>) -> Self {
        Self { metrics }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build collectors and register them in the default registry.
    ///
    /// Registration problems disable metrics rather than fail startup.
    pub fn with_default_registry() -> Self {
        let metrics = ReconcileMetrics::new().and_then(|m| {
            m.register(prometheus::default_registry())?;
            Ok(m)
        });
        match metrics {
            Ok(m) => Self::new(Some(m)),
            Err(e) => {
                warn!(error = %e, "reconcile metrics disabled");
                Self::disabled()
            }
        }
    }

    pub fn metrics(&self) -> Option<&ReconcileMetrics> {
        self.metrics.as_ref()
    }

    pub fn record(&self, outcome: &ReconcileOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(OutcomeKind::Success.as_str(), "success");
        assert_eq!(OutcomeKind::Skip.as_str(), "skip");
        assert_eq!(OutcomeKind::Delete.as_str(), "delete");
        assert_eq!(OutcomeKind::Terminal.as_str(), "terminal");
        assert_eq!(OutcomeKind::Error.to_string(), "error");
    }

    #[test]
    fn test_metrics_observe() {
        let metrics = ReconcileMetrics::new().unwrap();
        let recorder = OutcomeRecorder::new(Some(metrics.clone()));

        recorder.record(&ReconcileOutcome {
            kind: OutcomeKind::Success,
            duration: Duration::from_millis(20),
        });
        recorder.record(&ReconcileOutcome::new(OutcomeKind::Success));
        recorder.record(&ReconcileOutcome::new(OutcomeKind::Error));

        assert_eq!(metrics.count(OutcomeKind::Success), 2);
        assert_eq!(metrics.count(OutcomeKind::Error), 1);
        assert_eq!(metrics.count(OutcomeKind::Skip), 0);
        assert_eq!(metrics.duration_samples(OutcomeKind::Success), 2);
    }

    #[test]
    fn test_register_twice_is_tolerated() {
        let registry = Registry::new();
        let metrics = ReconcileMetrics::new().unwrap();
        metrics.register(&registry).unwrap();
        metrics.register(&registry).unwrap();

        let other = ReconcileMetrics::new().unwrap();
        other.register(&registry).unwrap();
    }

    #[test]
    fn test_disabled_recorder_is_noop() {
        let recorder = OutcomeRecorder::disabled();
        assert!(recorder.metrics().is_none());
        recorder.record(&ReconcileOutcome::new(OutcomeKind::Terminal));
    }
}
