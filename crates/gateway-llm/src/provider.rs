use async_trait::async_trait;

use gateway_types::{ProviderKind, RemoteModelEntry, Result};

// ---------------------------------------------------------------------------
// Listing capabilities
// ---------------------------------------------------------------------------

/// Backends that expose a model catalog (`GET /models`).
#[async_trait]
pub trait ModelLister: Send + Sync {
    async fn list_models(&self) -> Result<Vec<RemoteModelEntry>>;
    fn provider(&self) -> ProviderKind;
}

/// Backends where what can be called is a set of named deployments.
#[async_trait]
pub trait DeploymentLister: Send + Sync {
    async fn list_deployments(&self) -> Result<Vec<RemoteModelEntry>>;
    fn provider(&self) -> ProviderKind;
}

// ---------------------------------------------------------------------------
// ProviderClient
// ---------------------------------------------------------------------------

/// A provider client, tagged by the listing capability it supports.
pub enum ProviderClient {
    Models(Box<dyn ModelLister>),
    Deployments(Box<dyn DeploymentLister>),
}

impl ProviderClient {
    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderClient::Models(c) => c.provider(),
            ProviderClient::Deployments(c) => c.provider(),
        }
    }

    /// Name of the listing operation, for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            ProviderClient::Models(_) => "list_models",
            ProviderClient::Deployments(_) => "list_deployments",
        }
    }

    /// Run whichever listing this variant supports.
    pub async fn list_entries(&self) -> Result<Vec<RemoteModelEntry>> {
        match self {
            ProviderClient::Models(c) => c.list_models().await,
            ProviderClient::Deployments(c) => c.list_deployments().await,
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(self.operation())
            .field(&self.provider())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ScopedClient
// ---------------------------------------------------------------------------

/// A provider client owned for the duration of one connection's work.
///
/// The HTTP clients and any cached access token live inside the wrapped
/// client and are released when this value is dropped, whichever way the
/// scope ends.
#[derive(Debug)]
pub struct ScopedClient {
    connection: String,
    client: ProviderClient,
}

impl ScopedClient {
    pub fn new(connection: impl Into<String>, client: ProviderClient) -> Self {
        let connection = connection.into();
        tracing::debug!(connection = %connection, provider = %client.provider(), "Provider client acquired");
        Self { connection, client }
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    pub fn provider(&self) -> ProviderKind {
        self.client.provider()
    }

    pub async fn list_entries(&self) -> Result<Vec<RemoteModelEntry>> {
        self.client.list_entries().await
    }
}

impl Drop for ScopedClient {
    fn drop(&mut self) {
        tracing::debug!(connection = %self.connection, provider = %self.client.provider(), "Provider client released");
    }
}
