use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{GatewayError, ProviderKind, Result};

pub const DEFAULT_AZURE_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_AZURE_MANAGEMENT: &str = "https://management.azure.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Credential material for one upstream connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Static key sent on every call (`Authorization: Bearer` or `api-key`).
    ApiKey { api_key: String },
    /// Azure AD service principal used for the client-credentials flow.
    AzureAd(AzureAdCredentials),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("api_key", &"<redacted>")
                .finish(),
            Credentials::AzureAd(ad) => f.debug_tuple("AzureAd").field(ad).finish(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AzureAdCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub account_name: String,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
}

impl AzureAdCredentials {
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

impl fmt::Debug for AzureAdCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureAdCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("account_name", &self.account_name)
            .field("authority_host", &self.authority_host)
            .field("management_endpoint", &self.management_endpoint)
            .finish()
    }
}

fn default_authority_host() -> String {
    DEFAULT_AZURE_AUTHORITY.to_string()
}

fn default_management_endpoint() -> String {
    DEFAULT_AZURE_MANAGEMENT.to_string()
}

// ---------------------------------------------------------------------------
// NetworkSettings
// ---------------------------------------------------------------------------

/// Per-connection network policy: proxy, TLS trust material, and timeouts.
///
/// `proxy_url = None` means "auto-detect from the environment";
/// `Some("")` means "connect directly, never auto-detect".
#[derive(Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub proxy_username: Option<String>,
    #[serde(default)]
    pub proxy_password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub client_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl NetworkSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Explicit proxy credentials, when both halves are configured.
    pub fn proxy_credentials(&self) -> Option<(&str, &str)> {
        match (&self.proxy_username, &self.proxy_password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            verify_ssl: true,
            ca_cert_file: None,
            client_cert_file: None,
            client_key_file: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for NetworkSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkSettings")
            .field("proxy_url", &self.proxy_url)
            .field("proxy_username", &self.proxy_username)
            .field(
                "proxy_password",
                &self.proxy_password.as_ref().map(|_| "<redacted>"),
            )
            .field("verify_ssl", &self.verify_ssl)
            .field("ca_cert_file", &self.ca_cert_file)
            .field("client_cert_file", &self.client_cert_file)
            .field("client_key_file", &self.client_key_file)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// One configured upstream. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    /// Free-form provider tag; resolved to a [`ProviderKind`] by the client factory.
    pub provider: String,
    pub base_url: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub network: NetworkSettings,
}

impl ConnectionConfig {
    /// Connection authenticated with a static API key.
    pub fn with_api_key(
        name: impl Into<String>,
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            base_url: base_url.into(),
            credentials: Credentials::ApiKey {
                api_key: api_key.into(),
            },
            api_version: None,
            network: NetworkSettings::default(),
        }
    }

    /// Azure connection authenticated through an Azure AD service principal.
    pub fn with_azure_ad(
        name: impl Into<String>,
        base_url: impl Into<String>,
        credentials: AzureAdCredentials,
    ) -> Self {
        Self {
            name: name.into(),
            provider: ProviderKind::Azure.as_str().to_string(),
            base_url: base_url.into(),
            credentials: Credentials::AzureAd(credentials),
            api_version: None,
            network: NetworkSettings::default(),
        }
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn network(mut self, network: NetworkSettings) -> Self {
        self.network = network;
        self
    }

    pub fn provider_kind(&self) -> Result<ProviderKind> {
        self.provider.parse()
    }
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_sync_concurrency")]
    pub sync_concurrency: usize,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

fn default_database_url() -> String {
    "sqlite://gateway.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    1
}

fn default_sync_concurrency() -> usize {
    4
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            sync_concurrency: default_sync_concurrency(),
            connections: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load the configuration from a JSON file.
    ///
    /// A missing file yields the default (empty) configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            connections = config.connections.len(),
            "Loaded gateway config"
        );
        Ok(config)
    }

    /// Reject configs that can never be reconciled: blank or duplicate names,
    /// blank base URLs and zero timeouts. Unknown provider tags are left for the client
    /// factory, which treats them as a per-connection failure.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for conn in &self.connections {
            if conn.name.trim().is_empty() {
                return Err(GatewayError::InvalidInput(
                    "connection name must not be empty".into(),
                ));
            }
            if !seen.insert(conn.name.as_str()) {
                return Err(GatewayError::InvalidInput(format!(
                    "duplicate connection name '{}'",
                    conn.name
                )));
            }
            if conn.base_url.trim().is_empty() {
                return Err(GatewayError::InvalidInput(format!(
                    "connection '{}' has an empty base_url",
                    conn.name
                )));
            }
            if conn.network.timeout_secs == 0 || conn.network.connect_timeout_secs == 0 {
                return Err(GatewayError::InvalidInput(format!(
                    "connection '{}': timeouts must be at least 1 second",
                    conn.name
                )));
            }
        }
        if self.sync_concurrency == 0 {
            return Err(GatewayError::InvalidInput(
                "sync_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "database_url": "sqlite::memory:",
        "sync_concurrency": 2,
        "connections": [
            {
                "name": "openai-main",
                "provider": "openai",
                "base_url": "https://api.openai.com/v1",
                "credentials": { "type": "api_key", "api_key": "sk-test" }
            },
            {
                "name": "azure-west",
                "provider": "azure",
                "base_url": "https://west.openai.azure.com",
                "api_version": "2024-06-01",
                "credentials": {
                    "type": "azure_ad",
                    "tenant_id": "tenant",
                    "client_id": "client",
                    "client_secret": "secret",
                    "subscription_id": "sub",
                    "resource_group": "rg",
                    "account_name": "acct"
                },
                "network": { "proxy_url": "http://proxy.corp:3128", "verify_ssl": false }
            }
        ]
    }"#;

    #[test]
    fn parses_sample_config() {
        let config: GatewayConfig = serde_json::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.sync_concurrency, 2);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.connections.len(), 2);

        let openai = config.connection("openai-main").unwrap();
        assert_eq!(openai.provider_kind().unwrap(), ProviderKind::OpenAi);
        assert!(openai.network.verify_ssl);
        assert_eq!(openai.network.timeout(), Duration::from_secs(30));

        let azure = config.connection("azure-west").unwrap();
        assert_eq!(azure.api_version.as_deref(), Some("2024-06-01"));
        assert_eq!(
            azure.network.proxy_url.as_deref(),
            Some("http://proxy.corp:3128")
        );
        assert!(!azure.network.verify_ssl);
        match &azure.credentials {
            Credentials::AzureAd(ad) => {
                assert_eq!(ad.authority_host, DEFAULT_AZURE_AUTHORITY);
                assert_eq!(ad.management_endpoint, DEFAULT_AZURE_MANAGEMENT);
                assert_eq!(
                    ad.token_url(),
                    "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
                );
            }
            other => panic!("expected azure_ad credentials, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config: GatewayConfig = serde_json::from_str(SAMPLE).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-test"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn duplicate_connection_names_rejected() {
        let mut config = GatewayConfig::default();
        config.connections.push(ConnectionConfig::with_api_key(
            "dup",
            "openai",
            "https://a.example.com",
            "k",
        ));
        config.connections.push(ConnectionConfig::with_api_key(
            "dup",
            "azure",
            "https://b.example.com",
            "k",
        ));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate connection name"));
    }

    #[test]
    fn zero_timeouts_rejected() {
        for (timeout_secs, connect_timeout_secs) in [(0, 10), (30, 0)] {
            let mut config = GatewayConfig::default();
            config.connections.push(
                ConnectionConfig::with_api_key("oa", "openai", "https://api.openai.com/v1", "k")
                    .network(NetworkSettings {
                        timeout_secs,
                        connect_timeout_secs,
                        ..NetworkSettings::default()
                    }),
            );
            let err = config.validate().unwrap_err();
            assert!(matches!(err, GatewayError::InvalidInput(_)), "{err}");
        }
    }

    #[test]
    fn unknown_provider_is_not_a_load_error() {
        let mut config = GatewayConfig::default();
        config.connections.push(ConnectionConfig::with_api_key(
            "claude",
            "anthropic",
            "https://api.anthropic.com",
            "k",
        ));
        assert!(config.validate().is_ok());
        assert!(config.connections[0].provider_kind().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(&dir.path().join("absent.json")).unwrap();
        assert!(config.connections.is_empty());
        assert_eq!(config.sync_concurrency, 4);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.connections.len(), 2);
    }

    #[test]
    fn proxy_credentials_require_both_halves() {
        let mut network = NetworkSettings::default();
        network.proxy_username = Some("alice".into());
        assert!(network.proxy_credentials().is_none());
        network.proxy_password = Some("pw".into());
        assert_eq!(network.proxy_credentials(), Some(("alice", "pw")));
    }
}
