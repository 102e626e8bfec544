//! In-memory share service with failure injection

use crate::domain::ports::ShareService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Failure the next matching call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareFailure {
    /// Retryable service error
    Transient,
    /// Input rejected by the service
    Validation,
}

impl ShareFailure {
    fn into_error(self, share: &str, operation: &str) -> Error {
        match self {
            ShareFailure::Transient => Error::ShareService {
                share: share.to_string(),
                operation: operation.to_string(),
                reason: "injected failure".into(),
            },
            ShareFailure::Validation => Error::ShareValidation {
                share: share.to_string(),
                reason: "injected validation failure".into(),
            },
        }
    }
}

#[derive(Default)]
struct State {
    shares: BTreeMap<String, i32>,
    ensure_calls: usize,
    delete_calls: usize,
    ensure_failures: Vec<ShareFailure>,
    delete_failures: Vec<ShareFailure>,
}

/// [`ShareService`] keeping shares in a map
///
/// Ensuring an existing share leaves its quota unchanged.
#[derive(Default)]
pub struct MemoryShareService {
    state: Mutex<State>,
}

impl MemoryShareService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `ensure_share` call
    pub fn fail_next_ensure(&self, failure: ShareFailure) {
        self.state.lock().ensure_failures.push(failure);
    }

    /// Fail the next `delete_share` call
    pub fn fail_next_delete(&self, failure: ShareFailure) {
        self.state.lock().delete_failures.push(failure);
    }

    pub fn insert_share(&self, name: &str, quota_gib: i32) {
        self.state.lock().shares.insert(name.to_string(), quota_gib);
    }

    pub fn quota(&self, name: &str) -> Option<i32> {
        self.state.lock().shares.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().shares.contains_key(name)
    }

    pub fn ensure_calls(&self) -> usize {
        self.state.lock().ensure_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().delete_calls
    }
}

#[async_trait]
impl ShareService for MemoryShareService {
    async fn ensure_share(&self, name: &str, quota_gib: i32) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_calls += 1;
        if !state.ensure_failures.is_empty() {
            return Err(state.ensure_failures.remove(0).into_error(name, "create"));
        }
        if name.is_empty() || quota_gib < 0 {
            return Err(ShareFailure::Validation.into_error(name, "create"));
        }
        state.shares.entry(name.to_string()).or_insert(quota_gib);
        Ok(())
    }

    async fn delete_share(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.delete_calls += 1;
        if !state.delete_failures.is_empty() {
            return Err(state.delete_failures.remove(0).into_error(name, "delete"));
        }
        state.shares.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_never_resizes() {
        let shares = MemoryShareService::new();
        shares.ensure_share("team-data", 5).await.unwrap();
        shares.ensure_share("team-data", 10).await.unwrap();

        assert_eq!(shares.quota("team-data"), Some(5));
        assert_eq!(shares.ensure_calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let shares = MemoryShareService::new();
        shares.delete_share("missing").await.unwrap();
        assert_eq!(shares.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let shares = MemoryShareService::new();
        shares.fail_next_ensure(ShareFailure::Transient);

        let err = shares.ensure_share("team-data", 1).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!shares.contains("team-data"));

        shares.ensure_share("team-data", 1).await.unwrap();
        assert!(shares.contains("team-data"));

        shares.fail_next_delete(ShareFailure::Validation);
        assert!(shares.delete_share("team-data").await.unwrap_err().is_terminal());
    }
}
