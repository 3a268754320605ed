//! Shared types, errors, and configuration for the LLM gateway core.
//!
//! This crate provides the foundational types used across all other gateway crates:
//! - `GatewayError`: unified error taxonomy
//! - `ProviderKind`: the closed set of upstream provider variants
//! - `ConnectionConfig` / `GatewayConfig`: upstream connection settings
//! - `CatalogModel`, `RemoteModelEntry`, `AuditRecord`: catalog and audit records

mod config;
mod model;

pub use config::*;
pub use model::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unified error type for all gateway subsystems.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported provider '{provider}'")]
    UnsupportedProvider { provider: String },

    // === Upstream Errors ===
    #[error("Transport error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Provider {provider} returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed for provider {provider}: {message}")]
    Authentication { provider: String, message: String },

    // === Storage Errors ===
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Returns `true` if the error is transient and the call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. } | GatewayError::RequestTimeout { .. } => true,
            GatewayError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` when the failure is confined to one upstream connection and
    /// a batch over many connections should carry on.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            GatewayError::UnsupportedProvider { .. }
                | GatewayError::Transport { .. }
                | GatewayError::RequestTimeout { .. }
                | GatewayError::Provider { .. }
                | GatewayError::Authentication { .. }
        )
    }

    /// Short machine-friendly tag, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration",
            GatewayError::UnsupportedProvider { .. } => "unsupported_provider",
            GatewayError::Transport { .. } => "transport",
            GatewayError::RequestTimeout { .. } => "timeout",
            GatewayError::Provider { .. } => "provider",
            GatewayError::Authentication { .. } => "authentication",
            GatewayError::Persistence(_) => "persistence",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::Io(_) => "io",
            GatewayError::Json(_) => "json",
        }
    }
}

/// A convenience alias for `Result<T, GatewayError>`.
pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Upstream provider variants the gateway knows how to talk to.
///
/// Connection configs carry the provider as a free-form tag; parsing it into a
/// `ProviderKind` is where unknown tags are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Azure,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(ProviderKind::OpenAi),
            "azure" | "azure_openai" | "azure-openai" => Ok(ProviderKind::Azure),
            _ => Err(GatewayError::UnsupportedProvider {
                provider: tag.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider() {
        let err = GatewayError::Provider {
            provider: "openai".into(),
            status: 503,
            message: "service unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider openai returned HTTP 503: service unavailable"
        );
    }

    #[test]
    fn error_display_unsupported_provider() {
        let err = GatewayError::UnsupportedProvider {
            provider: "anthropic".into(),
        };
        assert_eq!(err.to_string(), "Unsupported provider 'anthropic'");
    }

    #[test]
    fn error_display_not_found() {
        let err = GatewayError::NotFound {
            entity: "Model".into(),
            id: "42".into(),
        };
        assert_eq!(err.to_string(), "Model '42' not found");
    }

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::RequestTimeout {
            provider: "azure".into(),
            timeout_ms: 30_000
        }
        .is_retryable());
        assert!(GatewayError::Provider {
            provider: "openai".into(),
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(GatewayError::Provider {
            provider: "openai".into(),
            status: 502,
            message: String::new()
        }
        .is_retryable());
        assert!(!GatewayError::Provider {
            provider: "openai".into(),
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!GatewayError::Authentication {
            provider: "azure".into(),
            message: "bad secret".into()
        }
        .is_retryable());
        assert!(!GatewayError::Persistence("disk full".into()).is_retryable());
    }

    #[test]
    fn upstream_classification() {
        assert!(GatewayError::UnsupportedProvider {
            provider: "x".into()
        }
        .is_upstream());
        assert!(!GatewayError::Persistence("locked".into()).is_upstream());
        assert!(!GatewayError::Configuration("bad url".into()).is_upstream());
    }

    #[test]
    fn provider_kind_parses_known_tags() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("azure".parse::<ProviderKind>().unwrap(), ProviderKind::Azure);
        assert_eq!(
            "azure_openai".parse::<ProviderKind>().unwrap(),
            ProviderKind::Azure
        );
    }

    #[test]
    fn provider_kind_rejects_unknown_tag() {
        let err = "anthropic".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UnsupportedProvider { ref provider } if provider == "anthropic"
        ));
    }

    #[test]
    fn provider_kind_serializes_lowercase_tag() {
        let json = serde_json::to_string(&ProviderKind::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        assert_eq!(ProviderKind::Azure.to_string(), "azure");
    }
}
