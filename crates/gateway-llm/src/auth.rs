use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use gateway_types::{AzureAdCredentials, GatewayError, ProviderKind, Result};

use crate::http::map_send_error;
use crate::{execute_with_retry, RetryConfig};

pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
const REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);
/// Advertised lifetimes above this are clamped.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Azure AD client-credentials token source.
///
/// The token is cached until five minutes before its advertised expiry and
/// refreshed on the next request after that. Concurrent callers share one
/// refresh.
pub struct AzureTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    timeout: Duration,
    retry: RetryConfig,
    cache: Mutex<Option<CachedToken>>,
}

impl AzureTokenProvider {
    pub fn new(http: reqwest::Client, credentials: &AzureAdCredentials) -> Self {
        Self {
            http,
            token_url: credentials.token_url(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            scope: MANAGEMENT_SCOPE.to_string(),
            timeout: Duration::from_secs(gateway_types::DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
            cache: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// A valid access token, fetching a new one when the cached token is
    /// missing or inside the refresh window.
    pub async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
            tracing::debug!("Azure AD token inside refresh window");
        }

        let fresh = execute_with_retry(|| self.request_token(), &self.retry, "token_exchange").await?;
        let access_token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access_token)
    }

    /// Drop the cached token.
    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    async fn request_token(&self) -> Result<CachedToken> {
        tracing::debug!(url = %self.token_url, "Requesting Azure AD token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| map_send_error(e, ProviderKind::Azure, self.timeout))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Authentication {
                provider: ProviderKind::Azure.to_string(),
                message: format!("token request rejected with HTTP {}: {}", status.as_u16(), token_error(&body)),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::http::status_error(ProviderKind::Azure, status.as_u16(), &body));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| map_send_error(e, ProviderKind::Azure, self.timeout))?;
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Authentication {
                provider: ProviderKind::Azure.to_string(),
                message: "token response carried no access_token".into(),
            })?;

        let lifetime = token_lifetime(body.expires_in);
        tracing::debug!(expires_in_secs = lifetime.as_secs(), "Azure AD token refreshed");
        let now = Instant::now();
        Ok(CachedToken {
            access_token,
            refresh_at: now
                .checked_add(lifetime.saturating_sub(REFRESH_SKEW))
                .unwrap_or(now),
        })
    }
}

impl std::fmt::Debug for AzureTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureTokenProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// The `error_description` (or `error`) of an AAD error body, falling back
/// to the raw text.
fn token_lifetime(expires_in: Option<u64>) -> Duration {
    Duration::from_secs(expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)).min(MAX_TOKEN_LIFETIME)
}

fn token_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error_description")
                .or_else(|| v.get("error"))
                .and_then(|e| e.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().chars().take(200).collect())
}
