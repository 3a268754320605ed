use std::time::Duration;

use gateway_types::{
    GatewayError, NetworkSettings, Result, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
};

use crate::{ProxyAuth, ProxyDescriptor, ProxyResolver, TlsContext};

// ---------------------------------------------------------------------------
// Options / handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Upper bound on a whole request, body included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl TransportOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &NetworkSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Async,
    Blocking,
}

/// A built HTTP client. The blocking variant owns its own runtime thread and
/// must be dropped outside of an async context.
#[derive(Debug, Clone)]
pub enum ClientHandle {
    Async(reqwest::Client),
    Blocking(reqwest::blocking::Client),
}

impl ClientHandle {
    pub fn mode(&self) -> ClientMode {
        match self {
            ClientHandle::Async(_) => ClientMode::Async,
            ClientHandle::Blocking(_) => ClientMode::Blocking,
        }
    }

    pub fn into_async(self) -> Result<reqwest::Client> {
        match self {
            ClientHandle::Async(client) => Ok(client),
            ClientHandle::Blocking(_) => Err(GatewayError::Configuration(
                "expected an async client, got a blocking one".into(),
            )),
        }
    }

    pub fn into_blocking(self) -> Result<reqwest::blocking::Client> {
        match self {
            ClientHandle::Blocking(client) => Ok(client),
            ClientHandle::Async(_) => Err(GatewayError::Configuration(
                "expected a blocking client, got an async one".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportFactory
// ---------------------------------------------------------------------------

/// Builds HTTP clients bound to exactly one proxy decision and one timeout.
#[derive(Debug, Clone)]
pub struct TransportFactory {
    resolver: ProxyResolver,
}

// Both reqwest builders expose the same configuration surface under
// different types, so the shared setup is expanded once per builder.
macro_rules! configure_builder {
    ($builder:expr, $proxy:expr, $tls:expr, $options:expr) => {{
        let mut builder = $builder
            .timeout($options.timeout)
            .connect_timeout($options.connect_timeout);
        builder = match $proxy.to_reqwest()? {
            Some(proxy) => builder.proxy(proxy),
            None => builder.no_proxy(),
        };
        if let Some(tls) = $tls {
            for root in tls.roots() {
                builder = builder.add_root_certificate(root.clone());
            }
            if let Some(identity) = tls.identity() {
                builder = builder.identity(identity.clone());
            }
            if !tls.verifies_certificates() {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        builder
    }};
}

impl TransportFactory {
    pub fn new(resolver: ProxyResolver) -> Self {
        Self { resolver }
    }

    pub fn from_process_env() -> Self {
        Self::new(ProxyResolver::from_process_env())
    }

    pub fn resolver(&self) -> &ProxyResolver {
        &self.resolver
    }

    /// Build a client for `target_url` with an already-resolved proxy.
    ///
    /// A `Direct` descriptor disables proxying in the HTTP library too, so the
    /// environment is never re-read behind the resolver's back.
    pub fn create_client(
        &self,
        target_url: &str,
        proxy: &ProxyDescriptor,
        tls: Option<&TlsContext>,
        options: &TransportOptions,
        mode: ClientMode,
    ) -> Result<ClientHandle> {
        tracing::debug!(
            target_url = %target_url,
            proxy = %proxy,
            timeout_ms = options.timeout.as_millis() as u64,
            custom_tls = tls.is_some(),
            ?mode,
            "Building HTTP client"
        );

        let handle = match mode {
            ClientMode::Async => {
                let builder = configure_builder!(reqwest::Client::builder(), proxy, tls, options);
                ClientHandle::Async(builder.build().map_err(build_error)?)
            }
            ClientMode::Blocking => {
                let builder = configure_builder!(
                    reqwest::blocking::Client::builder(),
                    proxy,
                    tls,
                    options
                );
                ClientHandle::Blocking(builder.build().map_err(build_error)?)
            }
        };
        Ok(handle)
    }

    /// Resolve the proxy and TLS material from a connection's network
    /// settings, then build the client.
    pub fn client_for(
        &self,
        target_url: &str,
        settings: &NetworkSettings,
        mode: ClientMode,
    ) -> Result<ClientHandle> {
        let explicit_auth = settings
            .proxy_credentials()
            .map(|(user, pass)| ProxyAuth::new(user, pass));
        let proxy = self
            .resolver
            .resolve(target_url, settings.proxy_url.as_deref(), explicit_auth)?;
        let tls = TlsContext::from_settings(settings)?;
        let options = TransportOptions::from_settings(settings);
        self.create_client(target_url, &proxy, tls.as_ref(), &options, mode)
    }

    pub fn async_client(
        &self,
        target_url: &str,
        settings: &NetworkSettings,
    ) -> Result<reqwest::Client> {
        self.client_for(target_url, settings, ClientMode::Async)?
            .into_async()
    }

    /// Must be called (and the client dropped) outside of an async runtime.
    pub fn blocking_client(
        &self,
        target_url: &str,
        settings: &NetworkSettings,
    ) -> Result<reqwest::blocking::Client> {
        self.client_for(target_url, settings, ClientMode::Blocking)?
            .into_blocking()
    }
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::from_process_env()
    }
}

fn build_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Configuration(format!("failed to build HTTP client: {e}"))
}
