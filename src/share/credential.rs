//! Azure AD token credentials
//!
//! Bearer tokens for the storage data plane, acquired one of three ways:
//!
//! - **workload**: federated service-account token exchanged with a
//!   client-assertion grant
//! - **managed**: the instance metadata service (IMDS)
//! - **env**: client id + client secret
//!
//! Every credential caches its token until shortly before expiry.

use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// OAuth scope for Azure Storage
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Resource URI for Azure Storage (IMDS uses resources, not scopes)
pub const STORAGE_RESOURCE_URI: &str = "https://storage.azure.com/";

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 300;

// =============================================================================
// Tokens
// =============================================================================

/// A bearer token and its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token is still usable at `now`
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// Source of bearer tokens for the storage data plane
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> Result<AccessToken>;
}

pub type TokenCredentialRef = Arc<dyn TokenCredential>;

impl std::fmt::Debug for dyn TokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCredential")
    }
}

#[derive(Default)]
struct TokenCache {
    cached: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    fn get(&self) -> Option<AccessToken> {
        self.cached
            .lock()
            .as_ref()
            .filter(|t| t.is_fresh_at(Utc::now()))
            .cloned()
    }

    fn put(&self, token: &AccessToken) {
        *self.cached.lock() = Some(token.clone());
    }
}

/// `expires_in` is a number from AAD and a string from IMDS
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
}

impl TokenResponse {
    fn into_token(self) -> Result<AccessToken> {
        let secs = match self.expires_in {
            ExpiresIn::Seconds(s) => s,
            ExpiresIn::Text(s) => s
                .parse()
                .map_err(|_| Error::Credential(format!("invalid expires_in: {:?}", s)))?,
        };
        Ok(AccessToken {
            token: self.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(secs),
        })
    }
}

async fn read_token_response(response: reqwest::Response, source: &str) -> Result<AccessToken> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Credential(format!(
            "{} returned {}: {}",
            source, status, body
        )));
    }
    response.json::<TokenResponse>().await?.into_token()
}

fn token_url(authority_host: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        authority_host.trim_end_matches('/'),
        tenant_id
    )
}

// =============================================================================
// Workload Identity
// =============================================================================

/// Exchanges a projected service-account token for an AAD token
pub struct WorkloadIdentityCredential {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    token_file: PathBuf,
    authority_host: String,
    cache: TokenCache,
}

impl WorkloadIdentityCredential {
    pub fn new(
        http: reqwest::Client,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        token_file: impl Into<PathBuf>,
        authority_host: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            token_file: token_file.into(),
            authority_host: authority_host.into(),
            cache: TokenCache::default(),
        }
    }

    /// The federated assertion; re-read every time since kubelet rotates it
    async fn assertion(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.token_file).await?;
        let assertion = raw.trim();
        if assertion.is_empty() {
            return Err(Error::Credential(format!(
                "federated token file {} is empty",
                self.token_file.display()
            )));
        }
        Ok(assertion.to_string())
    }
}

#[async_trait]
impl TokenCredential for WorkloadIdentityCredential {
    async fn token(&self) -> Result<AccessToken> {
        if let Some(token) = self.cache.get() {
            return Ok(token);
        }

        let assertion = self.assertion().await?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("scope", STORAGE_SCOPE),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];

        let response = self
            .http
            .post(token_url(&self.authority_host, &self.tenant_id))
            .form(&form)
            .send()
            .await?;
        let token = read_token_response(response, "token endpoint").await?;

        debug!(expires_at = %token.expires_at, "acquired workload identity token");
        self.cache.put(&token);
        Ok(token)
    }
}

// =============================================================================
// Managed Identity
// =============================================================================

/// Tokens from the instance metadata service
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    max_elapsed: Duration,
    cache: TokenCache,
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, client_id: Option<String>) -> Self {
        Self {
            http,
            endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
            client_id,
            max_elapsed: Duration::from_secs(30),
            cache: TokenCache::default(),
        }
    }

    /// Override the IMDS endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Bound the total time spent retrying IMDS
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn request(&self) -> std::result::Result<AccessToken, backoff::Error<Error>> {
        let mut query = vec![
            ("api-version", IMDS_API_VERSION),
            ("resource", STORAGE_RESOURCE_URI),
        ];
        if let Some(client_id) = self.client_id.as_deref() {
            query.push(("client_id", client_id));
        }

        let response = self
            .http
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(Error::Http(e)))?;

        let status = response.status();
        // IMDS answers 404 while the identity is still being assigned
        let retryable = status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::GONE;

        match read_token_response(response, "IMDS").await {
            Ok(token) => Ok(token),
            Err(e) if retryable => {
                warn!(status = %status, "IMDS token request failed, retrying");
                Err(backoff::Error::transient(e))
            }
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn token(&self) -> Result<AccessToken> {
        if let Some(token) = self.cache.get() {
            return Ok(token);
        }

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };
        let token = backoff::future::retry(policy, || self.request()).await?;

        debug!(expires_at = %token.expires_at, "acquired managed identity token");
        self.cache.put(&token);
        Ok(token)
    }
}

// =============================================================================
// Client Secret
// =============================================================================

/// Client-credentials grant with a shared secret
pub struct ClientSecretCredential {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authority_host: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_host: authority_host.into(),
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<AccessToken> {
        if let Some(token) = self.cache.get() {
            return Ok(token);
        }

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", STORAGE_SCOPE),
        ];
        let response = self
            .http
            .post(token_url(&self.authority_host, &self.tenant_id))
            .form(&form)
            .send()
            .await?;
        let token = read_token_response(response, "token endpoint").await?;

        debug!(expires_at = %token.expires_at, "acquired client secret token");
        self.cache.put(&token);
        Ok(token)
    }
}

// =============================================================================
// Selection
// =============================================================================

/// How the controller authenticates to Azure Storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthMode {
    Workload,
    Managed,
    Env,
}

/// Inputs for [`build_credential`]
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub mode: AuthMode,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub federated_token_file: Option<PathBuf>,
    pub authority_host: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Workload,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            federated_token_file: None,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str, mode: AuthMode) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Configuration(format!("{} is required for {:?} auth", what, mode)))
}

/// Build the credential selected by `config.mode`
pub fn build_credential(
    http: reqwest::Client,
    config: &CredentialConfig,
) -> Result<TokenCredentialRef> {
    let credential: TokenCredentialRef = match config.mode {
        AuthMode::Workload => {
            let tenant_id = required(&config.tenant_id, "tenant id", config.mode)?;
            let client_id = required(&config.client_id, "client id", config.mode)?;
            let token_file = config.federated_token_file.clone().ok_or_else(|| {
                Error::Configuration("federated token file is required for Workload auth".into())
            })?;
            Arc::new(WorkloadIdentityCredential::new(
                http,
                tenant_id,
                client_id,
                token_file,
                config.authority_host.clone(),
            ))
        }
        AuthMode::Managed => Arc::new(ManagedIdentityCredential::new(
            http,
            config.client_id.clone().filter(|id| !id.is_empty()),
        )),
        AuthMode::Env => {
            let tenant_id = required(&config.tenant_id, "tenant id", config.mode)?;
            let client_id = required(&config.client_id, "client id", config.mode)?;
            let secret = required(&config.client_secret, "client secret", config.mode)?;
            Arc::new(ClientSecretCredential::new(
                http,
                tenant_id,
                client_id,
                secret,
                config.authority_host.clone(),
            ))
        }
    };
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_token_freshness() {
        let now = Utc::now();
        let token = AccessToken {
            token: "t".into(),
            expires_at: now + ChronoDuration::seconds(3600),
        };
        assert!(token.is_fresh_at(now));
        assert!(!token.is_fresh_at(now + ChronoDuration::seconds(3400)));
    }

    #[test]
    fn test_token_cache_skips_stale() {
        let cache = TokenCache::default();
        assert!(cache.get().is_none());

        cache.put(&AccessToken {
            token: "old".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(60),
        });
        assert!(cache.get().is_none());

        cache.put(&AccessToken {
            token: "new".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(3600),
        });
        assert_eq!(cache.get().unwrap().token, "new");
    }

    #[test]
    fn test_expires_in_accepts_number_and_string() {
        let aad: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3599}"#).unwrap();
        let imds: TokenResponse =
            serde_json::from_str(r#"{"access_token":"b","expires_in":"3599"}"#).unwrap();

        assert!(aad.into_token().unwrap().is_fresh_at(Utc::now()));
        assert_eq!(imds.into_token().unwrap().token, "b");

        let bad: TokenResponse =
            serde_json::from_str(r#"{"access_token":"c","expires_in":"soon"}"#).unwrap();
        assert_matches!(bad.into_token(), Err(Error::Credential(_)));
    }

    #[test]
    fn test_token_url() {
        assert_eq!(
            token_url("https://login.microsoftonline.com/", "tenant"),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn test_workload_assertion_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  header.payload.signature  ").unwrap();

        let credential = WorkloadIdentityCredential::new(
            reqwest::Client::new(),
            "tenant",
            "client",
            file.path(),
            DEFAULT_AUTHORITY_HOST,
        );
        assert_eq!(credential.assertion().await.unwrap(), "header.payload.signature");
    }

    #[tokio::test]
    async fn test_workload_assertion_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let credential = WorkloadIdentityCredential::new(
            reqwest::Client::new(),
            "tenant",
            "client",
            file.path(),
            DEFAULT_AUTHORITY_HOST,
        );
        assert_matches!(credential.assertion().await, Err(Error::Credential(_)));
    }

    #[test]
    fn test_build_credential_requires_inputs() {
        let http = reqwest::Client::new();

        let workload = CredentialConfig::default();
        assert_matches!(
            build_credential(http.clone(), &workload),
            Err(Error::Configuration(_))
        );

        let env = CredentialConfig {
            mode: AuthMode::Env,
            tenant_id: Some("tenant".into()),
            client_id: Some("client".into()),
            ..Default::default()
        };
        assert_matches!(build_credential(http.clone(), &env), Err(Error::Configuration(_)));

        let managed = CredentialConfig {
            mode: AuthMode::Managed,
            ..Default::default()
        };
        assert!(build_credential(http, &managed).is_ok());
    }
}
