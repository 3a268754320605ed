use gateway_net::TransportFactory;
use gateway_types::{ConnectionConfig, Credentials, GatewayError, ProviderKind, Result};

use crate::{
    AzureClient, AzureTokenProvider, OpenAiClient, ProviderClient, RetryConfig, ScopedClient,
};

// ---------------------------------------------------------------------------
// ClientFactory
// ---------------------------------------------------------------------------

/// Turns a connection config into a scoped provider client.
///
/// Fails with [`GatewayError::UnsupportedProvider`] for provider tags with no
/// matching variant; callers batching over many configs skip that one.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, config: &ConnectionConfig) -> Result<ScopedClient>;
}

/// The factory for real upstreams. The only place provider tags are mapped to
/// client variants.
#[derive(Debug, Clone, Default)]
pub struct ProviderClientFactory {
    transport: TransportFactory,
    retry: RetryConfig,
}

impl ProviderClientFactory {
    pub fn new(transport: TransportFactory) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport(&self) -> &TransportFactory {
        &self.transport
    }

    fn build(&self, config: &ConnectionConfig) -> Result<ProviderClient> {
        let kind = config.provider_kind()?;
        let network = &config.network;
        let timeout = network.timeout();

        let client = match (kind, &config.credentials) {
            (ProviderKind::OpenAi, Credentials::ApiKey { api_key }) => {
                let http = self.transport.async_client(&config.base_url, network)?;
                let client = OpenAiClient::new(http, &config.base_url, api_key)
                    .with_timeout(timeout)
                    .with_retry(self.retry.clone());
                ProviderClient::Models(Box::new(client))
            }
            (ProviderKind::OpenAi, Credentials::AzureAd(_)) => {
                return Err(GatewayError::Configuration(format!(
                    "connection '{}': OpenAI connections authenticate with an API key",
                    config.name
                )));
            }
            (ProviderKind::Azure, Credentials::ApiKey { api_key }) => {
                let http = self.transport.async_client(&config.base_url, network)?;
                let client = AzureClient::with_api_key(
                    http,
                    &config.base_url,
                    api_key,
                    config.api_version.as_deref(),
                )
                .with_timeout(timeout)
                .with_retry(self.retry.clone());
                ProviderClient::Deployments(Box::new(client))
            }
            (ProviderKind::Azure, Credentials::AzureAd(ad)) => {
                let token_http = self.transport.async_client(&ad.token_url(), network)?;
                let tokens = AzureTokenProvider::new(token_http, ad)
                    .with_timeout(timeout)
                    .with_retry(self.retry.clone());
                let management_http = self
                    .transport
                    .async_client(&ad.management_endpoint, network)?;
                let client = AzureClient::with_service_principal(management_http, tokens, ad)
                    .with_timeout(timeout)
                    .with_retry(self.retry.clone());
                ProviderClient::Deployments(Box::new(client))
            }
        };
        Ok(client)
    }
}

impl ClientFactory for ProviderClientFactory {
    fn create_client(&self, config: &ConnectionConfig) -> Result<ScopedClient> {
        let client = self.build(config)?;
        Ok(ScopedClient::new(&config.name, client))
    }
}
