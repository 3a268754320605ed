use std::time::Duration;

use async_trait::async_trait;

use gateway_types::{ProviderKind, RemoteModelEntry, Result};

use crate::http::{listing_items, send_json};
use crate::{execute_with_retry, ModelLister, RetryConfig};

// ---------------------------------------------------------------------------
// OpenAiClient
// ---------------------------------------------------------------------------

/// OpenAI-style API: bearer key, `GET {base_url}/models`.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(gateway_types::DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }

    /// Only used to report the limit in timeout errors; the HTTP client
    /// enforces it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    async fn fetch_models(&self) -> Result<Vec<RemoteModelEntry>> {
        let request = self.http.get(self.models_url()).bearer_auth(&self.api_key);
        let body: serde_json::Value = send_json(request, ProviderKind::OpenAi, self.timeout).await?;

        let entries: Vec<RemoteModelEntry> = listing_items(&body, "data")
            .into_iter()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?.to_string();
                Some(RemoteModelEntry::new(id, item, ProviderKind::OpenAi))
            })
            .collect();
        Ok(entries)
    }
}

#[async_trait]
impl ModelLister for OpenAiClient {
    async fn list_models(&self) -> Result<Vec<RemoteModelEntry>> {
        tracing::debug!(url = %self.models_url(), "Listing OpenAI models");
        let entries = execute_with_retry(|| self.fetch_models(), &self.retry, "list_models").await?;
        tracing::debug!(count = entries.len(), "Listed OpenAI models");
        Ok(entries)
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
