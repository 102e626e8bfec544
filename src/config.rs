//! Provisioner configuration

use crate::binding::ShareLocation;
use crate::domain::literals::DEFAULT_PROVISIONER;
use crate::error::{Error, Result};
use crate::share::azure::default_endpoint;
use std::time::Duration;

/// Default per-invocation reconcile timeout
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by every reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// StorageClass provisioner value this controller serves
    pub provisioner: String,
    pub resource_group: String,
    pub storage_account: String,
    /// File endpoint host written into volume attributes
    pub file_server: String,
    pub reconcile_timeout: Duration,
}

impl ProvisionerConfig {
    /// Config with the default provisioner, file server and timeout
    pub fn new(resource_group: impl Into<String>, storage_account: impl Into<String>) -> Self {
        let storage_account = storage_account.into();
        Self {
            provisioner: DEFAULT_PROVISIONER.to_string(),
            resource_group: resource_group.into(),
            file_server: default_file_server(&storage_account),
            storage_account,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("provisioner", &self.provisioner),
            ("resource group", &self.resource_group),
            ("storage account", &self.storage_account),
            ("file server", &self.file_server),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        if let Some((what, _)) = missing {
            return Err(Error::Configuration(format!("{} must not be empty", what)));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::Configuration(
                "reconcile timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn share_location(&self) -> ShareLocation {
        ShareLocation {
            resource_group: self.resource_group.clone(),
            storage_account: self.storage_account.clone(),
            server: self.file_server.clone(),
        }
    }
}

/// Host of the account's default file endpoint
pub fn default_file_server(storage_account: &str) -> String {
    default_endpoint(storage_account)
        .trim_start_matches("https://")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = ProvisionerConfig::new("rg", "account");
        assert_eq!(config.provisioner, "ylabs.ch/azurefile-share-provisioner");
        assert_eq!(config.file_server, "account.file.core.windows.net");
        assert_eq!(config.reconcile_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        let mut config = ProvisionerConfig::new("rg", "account");
        config.provisioner = " ".into();
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let config = ProvisionerConfig::new("", "account");
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = ProvisionerConfig::new("rg", "account");
        config.reconcile_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_share_location() {
        let location = ProvisionerConfig::new("rg", "account").share_location();
        assert_eq!(location.volume_handle("share"), "rg#account#share");
        assert_eq!(location.server, "account.file.core.windows.net");
    }
}
