//! File share services
//!
//! - [`AzureFileShareClient`]: Azure Files over the storage REST API
//! - [`MemoryShareService`]: in-memory fake with failure injection
//! - [`credential`]: bearer tokens for the storage data plane

pub mod azure;
pub mod credential;
pub mod memory;

pub use azure::AzureFileShareClient;
pub use credential::{build_credential, AuthMode, CredentialConfig, TokenCredential};
pub use memory::{MemoryShareService, ShareFailure};
