//! Error types for the Azure File share provisioner
//!
//! Every failure the reconciler can hit is one of three kinds: terminal
//! validation failures that need an operator to fix the source object,
//! conflicts that are retried but never auto-resolved, and transient
//! infrastructure failures that are simply retried.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Stale snapshot for {kind}/{name}: object changed since it was read")]
    Conflict { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Validation Errors (terminal)
    // =========================================================================
    #[error("Invalid share name: {0}")]
    InvalidShareName(String),

    #[error("Invalid claim {claim}: {reason}")]
    InvalidClaim { claim: String, reason: String },

    #[error("Invalid volume input: {0}")]
    InvalidVolume(String),

    #[error("Share input rejected for {share}: {reason}")]
    ShareValidation { share: String, reason: String },

    // =========================================================================
    // Binding Conflicts
    // =========================================================================
    #[error("PersistentVolume {volume} does not match claim {claim} or share {share}")]
    VolumeMismatch {
        volume: String,
        claim: String,
        share: String,
    },

    // =========================================================================
    // Share Service Errors
    // =========================================================================
    #[error("Share operation failed: {operation} {share}: {reason}")]
    ShareService {
        share: String,
        operation: String,
        reason: String,
    },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Invocation Control
    // =========================================================================
    #[error("Reconcile timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reconcile cancelled by shutdown")]
    Cancelled,

    /// A deletion step failed; the finalizer stays until it succeeds
    #[error("Cleanup of {claim} failed: {source}")]
    CleanupFailed {
        claim: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Leadership lost: {0}")]
    LeadershipLost(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Http(_)
            | Error::ShareService { .. }
            | Error::Credential(_)
            | Error::Timeout(_)
            | Error::Cancelled
            | Error::CleanupFailed { .. } => ErrorAction::RequeueWithBackoff,

            // Someone else wrote first - re-read soon
            Error::Conflict { .. } | Error::ResourceExists { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(1))
            }

            // Binding collisions need an operator, but keep checking
            Error::VolumeMismatch { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::InvalidShareName(_)
            | Error::InvalidClaim { .. }
            | Error::InvalidVolume(_)
            | Error::ShareValidation { .. }
            | Error::QuantityParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error can only be fixed by correcting the source object
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::Http(_)
                | Error::ShareService { .. }
                | Error::Credential(_)
                | Error::Timeout(_)
                | Error::Cancelled
        )
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::VolumeMismatch {
            volume: "pvc-team-data-abc".into(),
            claim: "team/data".into(),
            share: "team-data".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );

        let err = Error::InvalidShareName("---".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Conflict {
            kind: "PersistentVolumeClaim".into(),
            name: "team/data".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::ShareService {
            share: "team-data".into(),
            operation: "create".into(),
            reason: "503 Service Unavailable".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let validation = Error::ShareValidation {
            share: "".into(),
            reason: "share name required".into(),
        };
        assert!(!validation.is_retryable());
        assert!(validation.is_terminal());
        assert!(!validation.is_transient());
    }

    #[test]
    fn test_mismatch_is_not_terminal() {
        let err = Error::VolumeMismatch {
            volume: "v".into(),
            claim: "c".into(),
            share: "s".into(),
        };
        assert!(!err.is_terminal());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_cleanup_failure_always_retries() {
        let err = Error::CleanupFailed {
            claim: "team/data".into(),
            source: Box::new(Error::ShareValidation {
                share: "ab".into(),
                reason: "400 Bad Request".into(),
            }),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
        assert!(!err.is_terminal());
        assert!(err.to_string().contains("400 Bad Request"));
    }
}
