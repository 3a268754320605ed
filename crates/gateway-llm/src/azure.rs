use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use gateway_types::{AzureAdCredentials, GatewayError, ProviderKind, RemoteModelEntry, Result};

use crate::http::{listing_items, send_json};
use crate::{execute_with_retry, AzureTokenProvider, DeploymentLister, RetryConfig};

pub const DEFAULT_AZURE_API_VERSION: &str = "2022-12-01";
pub const MANAGEMENT_API_VERSION: &str = "2024-10-01";

const CHAT_MODELS: &[&str] = &["gpt-4", "gpt-3.5-turbo", "gpt-35-turbo"];
const COMPLETION_MODELS: &[&str] = &[
    "text-davinci-003",
    "text-davinci-002",
    "text-curie-001",
    "text-babbage-001",
    "text-ada-001",
    "davinci-002",
    "babbage-002",
];
const EMBEDDING_MODELS: &[&str] = &["text-embedding", "ada-002"];

// ---------------------------------------------------------------------------
// AzureClient
// ---------------------------------------------------------------------------

enum Listing {
    /// `GET {base}/openai/deployments` on the resource endpoint, `api-key` header.
    ApiKey {
        base_url: String,
        api_key: String,
        api_version: String,
    },
    /// Cognitive Services management API with an Azure AD bearer token.
    Management {
        tokens: AzureTokenProvider,
        deployments_url: String,
    },
}

/// Azure OpenAI: what can be called is the set of deployments on one account.
pub struct AzureClient {
    http: reqwest::Client,
    listing: Listing,
    timeout: Duration,
    retry: RetryConfig,
}

impl AzureClient {
    pub fn with_api_key(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_version: Option<&str>,
    ) -> Self {
        Self {
            http,
            listing: Listing::ApiKey {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key: api_key.into(),
                api_version: api_version.unwrap_or(DEFAULT_AZURE_API_VERSION).to_string(),
            },
            timeout: Duration::from_secs(gateway_types::DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }

    /// `http` talks to the management endpoint; `tokens` owns its own client
    /// for the token endpoint.
    pub fn with_service_principal(
        http: reqwest::Client,
        tokens: AzureTokenProvider,
        credentials: &AzureAdCredentials,
    ) -> Self {
        let deployments_url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.CognitiveServices/accounts/{}/deployments?api-version={}",
            credentials.management_endpoint.trim_end_matches('/'),
            credentials.subscription_id,
            credentials.resource_group,
            credentials.account_name,
            MANAGEMENT_API_VERSION,
        );
        Self {
            http,
            listing: Listing::Management {
                tokens,
                deployments_url,
            },
            timeout: Duration::from_secs(gateway_types::DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
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

    pub fn deployments_url(&self) -> String {
        match &self.listing {
            Listing::ApiKey {
                base_url,
                api_version,
                ..
            } => format!("{base_url}/openai/deployments?api-version={api_version}"),
            Listing::Management {
                deployments_url, ..
            } => deployments_url.clone(),
        }
    }

    pub fn uses_service_principal(&self) -> bool {
        matches!(self.listing, Listing::Management { .. })
    }

    async fn fetch_deployments(&self) -> Result<Vec<RemoteModelEntry>> {
        match &self.listing {
            Listing::ApiKey { api_key, .. } => {
                let request = self.http.get(self.deployments_url()).header("api-key", api_key);
                let body: Value = send_json(request, ProviderKind::Azure, self.timeout).await?;
                Ok(listing_items(&body, "data")
                    .into_iter()
                    .filter_map(normalize_data_plane)
                    .collect())
            }
            Listing::Management {
                tokens,
                deployments_url,
            } => {
                let token = tokens.access_token().await?;
                let request = self.http.get(deployments_url).bearer_auth(token);
                let body: Value = match send_json(request, ProviderKind::Azure, self.timeout).await {
                    Ok(body) => body,
                    Err(e @ GatewayError::Authentication { .. }) => {
                        tokens.invalidate().await;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };
                Ok(listing_items(&body, "value")
                    .into_iter()
                    .filter_map(normalize_management)
                    .collect())
            }
        }
    }
}

#[async_trait]
impl DeploymentLister for AzureClient {
    async fn list_deployments(&self) -> Result<Vec<RemoteModelEntry>> {
        tracing::debug!(
            service_principal = self.uses_service_principal(),
            "Listing Azure deployments"
        );
        let entries =
            execute_with_retry(|| self.fetch_deployments(), &self.retry, "list_deployments").await?;
        tracing::debug!(count = entries.len(), "Listed Azure deployments");
        Ok(entries)
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Azure
    }
}

impl std::fmt::Debug for AzureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureClient")
            .field("deployments_url", &self.deployments_url())
            .field("service_principal", &self.uses_service_principal())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Capability flags guessed from the underlying model name.
pub fn deployment_capabilities(model_name: &str) -> Value {
    let name = model_name.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| name.contains(n));
    json!({
        "chat_completions": any(CHAT_MODELS),
        "completions": any(COMPLETION_MODELS),
        "embeddings": any(EMBEDDING_MODELS),
    })
}

/// Data-plane items already look like `{"id", "model", ...}`; add derived
/// capabilities when the service did not report any.
fn normalize_data_plane(mut item: Value) -> Option<RemoteModelEntry> {
    let id = item.get("id")?.as_str()?.to_string();
    if item.get("capabilities").is_none() {
        let model = item
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&id)
            .to_string();
        item["capabilities"] = deployment_capabilities(&model);
    }
    Some(RemoteModelEntry::new(id, item, ProviderKind::Azure))
}

/// Flatten a management API deployment resource. The deployment name is the
/// identifier callers use, so it becomes the entry id.
fn normalize_management(item: Value) -> Option<RemoteModelEntry> {
    let name = item.get("name")?.as_str()?.to_string();
    let properties = item.get("properties").cloned().unwrap_or_else(|| json!({}));
    let model = properties.get("model").cloned().unwrap_or_else(|| json!({}));
    let model_name = model.get("name").and_then(Value::as_str).unwrap_or_default();
    let text = |v: Option<&Value>, default: &str| {
        v.and_then(Value::as_str).unwrap_or(default).to_string()
    };

    let payload = json!({
        "id": name,
        "object": "model",
        "model": model_name,
        "deployment_id": name,
        "deployment_status": text(properties.get("provisioningState"), "Unknown"),
        "model_version": text(model.get("version"), ""),
        "model_format": text(model.get("format"), ""),
        "sku": item.get("sku").cloned().unwrap_or_else(|| json!({})),
        "scale_settings": properties.get("scaleSettings").cloned().unwrap_or_else(|| json!({})),
        "created": text(item.get("systemData").and_then(|s| s.get("createdAt")), ""),
        "owned_by": "azure-openai",
        "capabilities": deployment_capabilities(model_name),
    });
    Some(RemoteModelEntry::new(name, payload, ProviderKind::Azure))
}
