use std::path::Path;

use gateway_types::{GatewayError, NetworkSettings, Result};

/// TLS trust material handed to the transport as-is.
///
/// Extra roots are added on top of the bundled roots (corporate interception
/// CAs); an identity enables mutual TLS.
#[derive(Clone)]
pub struct TlsContext {
    roots: Vec<reqwest::Certificate>,
    identity: Option<reqwest::Identity>,
    verify: bool,
}

impl TlsContext {
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            identity: None,
            verify: true,
        }
    }

    /// Add every certificate in a PEM bundle as a trusted root.
    pub fn add_root_pem(mut self, pem: &[u8]) -> Result<Self> {
        let certs = reqwest::Certificate::from_pem_bundle(pem)
            .map_err(|e| GatewayError::Configuration(format!("invalid CA bundle: {e}")))?;
        if certs.is_empty() {
            return Err(GatewayError::Configuration(
                "CA bundle contains no certificates".into(),
            ));
        }
        self.roots.extend(certs);
        Ok(self)
    }

    /// Client identity from a PEM certificate chain and its private key.
    pub fn with_identity_pem(mut self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let mut buf = Vec::with_capacity(cert_pem.len() + key_pem.len() + 1);
        buf.extend_from_slice(cert_pem);
        buf.push(b'\n');
        buf.extend_from_slice(key_pem);
        let identity = reqwest::Identity::from_pem(&buf)
            .map_err(|e| GatewayError::Configuration(format!("invalid client identity: {e}")))?;
        self.identity = Some(identity);
        Ok(self)
    }

    /// Accept any server certificate. Only for debugging against
    /// intercepting proxies.
    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    pub fn verifies_certificates(&self) -> bool {
        self.verify
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub(crate) fn roots(&self) -> &[reqwest::Certificate] {
        &self.roots
    }

    pub(crate) fn identity(&self) -> Option<&reqwest::Identity> {
        self.identity.as_ref()
    }

    /// Build the context a connection's network settings ask for.
    ///
    /// Returns `None` when the settings need nothing beyond default trust.
    /// Missing files are logged and skipped; unreadable or invalid PEM data
    /// fails the build.
    pub fn from_settings(settings: &NetworkSettings) -> Result<Option<Self>> {
        let wants_custom = !settings.verify_ssl
            || settings.ca_cert_file.is_some()
            || settings.client_cert_file.is_some();
        if !wants_custom {
            return Ok(None);
        }

        let mut ctx = TlsContext::new();
        if !settings.verify_ssl {
            tracing::warn!("TLS certificate verification is disabled - not recommended for production");
            ctx = ctx.without_verification();
        }

        if let Some(ca) = &settings.ca_cert_file {
            match read_if_present(ca)? {
                Some(pem) => {
                    ctx = ctx.add_root_pem(&pem)?;
                    tracing::debug!(path = %ca.display(), "Loaded custom CA certificates");
                }
                None => tracing::warn!(path = %ca.display(), "CA certificate file not found"),
            }
        }

        match (&settings.client_cert_file, &settings.client_key_file) {
            (Some(cert), Some(key)) => match (read_if_present(cert)?, read_if_present(key)?) {
                (Some(cert_pem), Some(key_pem)) => {
                    ctx = ctx.with_identity_pem(&cert_pem, &key_pem)?;
                    tracing::debug!(path = %cert.display(), "Loaded client certificate");
                }
                _ => tracing::warn!(
                    cert = %cert.display(),
                    key = %key.display(),
                    "Client certificate or key file not found"
                ),
            },
            (Some(cert), None) => {
                tracing::warn!(cert = %cert.display(), "Client certificate configured without a key, ignoring")
            }
            _ => {}
        }

        Ok(Some(ctx))
    }
}

impl Default for TlsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("roots", &self.roots.len())
            .field("identity", &self.identity.is_some())
            .field("verify", &self.verify)
            .finish()
    }
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read(path)?))
}
