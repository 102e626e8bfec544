//! Azure Files share client over the storage REST API

use super::credential::TokenCredentialRef;
use crate::domain::ports::ShareService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tracing::{debug, info, instrument};

/// Storage service version sent with every request
pub const STORAGE_API_VERSION: &str = "2022-11-02";

const MIN_SHARE_NAME_LENGTH: usize = 3;
const MAX_SHARE_NAME_LENGTH: usize = 63;

/// Default file endpoint of a storage account
pub fn default_endpoint(account: &str) -> String {
    format!("https://{}.file.core.windows.net", account)
}

/// Reject share names the service would refuse with 400.
///
/// 3-63 characters of lowercase letters, digits and single hyphens, starting
/// and ending with a letter or digit.
pub fn validate_share_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::ShareValidation {
        share: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("share name required"));
    }
    if name.len() < MIN_SHARE_NAME_LENGTH || name.len() > MAX_SHARE_NAME_LENGTH {
        return Err(invalid("share name must be 3-63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("share name may only contain a-z, 0-9 and '-'"));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid("share name has a misplaced hyphen"));
    }
    Ok(())
}

/// [`ShareService`] backed by an Azure storage account
#[derive(Debug)]
pub struct AzureFileShareClient {
    http: reqwest::Client,
    endpoint: String,
    credential: TokenCredentialRef,
}

impl AzureFileShareClient {
    pub fn new(
        http: reqwest::Client,
        account: &str,
        credential: TokenCredentialRef,
    ) -> Result<Self> {
        if account.is_empty() {
            return Err(Error::Configuration("storage account required".into()));
        }
        Ok(Self {
            http,
            endpoint: default_endpoint(account),
            credential,
        })
    }

    /// Use a non-default file endpoint (sovereign clouds, private endpoints)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn share_url(&self, share: &str) -> String {
        format!(
            "{}/{}?restype=share",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(share)
        )
    }

    async fn request(&self, method: reqwest::Method, share: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.credential.token().await?;
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        Ok(self
            .http
            .request(method, self.share_url(share))
            .bearer_auth(token.token)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", date))
    }
}

fn error_code(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn failure(response: reqwest::Response, share: &str, operation: &str) -> Error {
    let status = response.status();
    let code = error_code(&response);
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::BAD_REQUEST {
        return Error::ShareValidation {
            share: share.to_string(),
            reason: format!("{} {}: {}", status, code, body),
        };
    }
    Error::ShareService {
        share: share.to_string(),
        operation: operation.to_string(),
        reason: format!("{} {}", status, code),
    }
}

#[async_trait]
impl ShareService for AzureFileShareClient {
    #[instrument(skip(self), fields(share = %name))]
    async fn ensure_share(&self, name: &str, quota_gib: i32) -> Result<()> {
        validate_share_name(name)?;
        if quota_gib < 0 {
            return Err(Error::ShareValidation {
                share: name.to_string(),
                reason: format!("quota must be non-negative, got {}", quota_gib),
            });
        }

        let mut request = self.request(reqwest::Method::PUT, name).await?;
        if quota_gib > 0 {
            request = request.header("x-ms-share-quota", quota_gib.to_string());
        }
        let response = request.body("").send().await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                info!(quota_gib, "share created");
                Ok(())
            }
            // Existing shares are never resized
            StatusCode::CONFLICT => {
                debug!(code = %error_code(&response), "share already exists");
                Ok(())
            }
            _ => Err(failure(response, name, "create").await),
        }
    }

    #[instrument(skip(self), fields(share = %name))]
    async fn delete_share(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::ShareValidation {
                share: String::new(),
                reason: "share name required".into(),
            });
        }

        let response = self
            .request(reqwest::Method::DELETE, name)
            .await?
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => {
                info!("share deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("share already absent");
                Ok(())
            }
            _ => Err(failure(response, name, "delete").await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::credential::{AccessToken, TokenCredential};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    struct StaticToken;

    #[async_trait]
    impl TokenCredential for StaticToken {
        async fn token(&self) -> Result<AccessToken> {
            Ok(AccessToken {
                token: "token".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    fn client() -> AzureFileShareClient {
        AzureFileShareClient::new(reqwest::Client::new(), "account", Arc::new(StaticToken)).unwrap()
    }

    #[test]
    fn test_share_url() {
        assert_eq!(
            client().share_url("team-data"),
            "https://account.file.core.windows.net/team-data?restype=share"
        );
        let custom = client().with_endpoint("https://account.file.core.chinacloudapi.cn/");
        assert_eq!(
            custom.share_url("team-data"),
            "https://account.file.core.chinacloudapi.cn/team-data?restype=share"
        );
    }

    #[test]
    fn test_validate_share_name() {
        assert!(validate_share_name("team-data").is_ok());
        assert!(validate_share_name("abc").is_ok());

        for bad in ["", "ab", "Team", "team_data", "-team", "team-", "team--data"] {
            assert_matches!(validate_share_name(bad), Err(Error::ShareValidation { .. }));
        }
        assert!(validate_share_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_empty_account_rejected() {
        let result = AzureFileShareClient::new(reqwest::Client::new(), "", Arc::new(StaticToken));
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_local_validation_happens_before_any_request() {
        let client = client().with_endpoint("http://127.0.0.1:9");

        let err = client.ensure_share("team-data", -1).await.unwrap_err();
        assert!(err.is_terminal());

        let err = client.ensure_share("Bad Name", 1).await.unwrap_err();
        assert!(err.is_terminal());

        let err = client.delete_share("").await.unwrap_err();
        assert!(err.is_terminal());
    }
}
