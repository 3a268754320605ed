use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::{GatewayError, ProviderKind, Result};

/// Capability map attached to a catalog model.
pub type Capabilities = HashMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ModelStatus
// ---------------------------------------------------------------------------

/// Catalog lifecycle. Moves forward by convention; nothing here enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    New,
    Pending,
    Approved,
    Disabled,
    Rejected,
    Deprecated,
    Retired,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::New => "NEW",
            ModelStatus::Pending => "PENDING",
            ModelStatus::Approved => "APPROVED",
            ModelStatus::Disabled => "DISABLED",
            ModelStatus::Rejected => "REJECTED",
            ModelStatus::Deprecated => "DEPRECATED",
            ModelStatus::Retired => "RETIRED",
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(ModelStatus::New),
            "PENDING" => Ok(ModelStatus::Pending),
            "APPROVED" => Ok(ModelStatus::Approved),
            "DISABLED" => Ok(ModelStatus::Disabled),
            "REJECTED" => Ok(ModelStatus::Rejected),
            "DEPRECATED" => Ok(ModelStatus::Deprecated),
            "RETIRED" => Ok(ModelStatus::Retired),
            other => Err(GatewayError::InvalidInput(format!(
                "unknown model status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteModelEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteModelEntry {
    /// Provider-reported identifier (model id or deployment name).
    pub id: String,
    /// Raw item as returned (or normalized) by the provider.
    pub payload: serde_json::Value,
    pub provider: ProviderKind,
}

impl RemoteModelEntry {
    pub fn new(id: impl Into<String>, payload: serde_json::Value, provider: ProviderKind) -> Self {
        Self {
            id: id.into(),
            payload,
            provider,
        }
    }

    /// The `capabilities` object from the payload, or an empty map.
    pub fn capabilities(&self) -> Capabilities {
        self.payload
            .get("capabilities")
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// CatalogModel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogModel {
    /// Assigned by storage; `None` until the model has been added.
    pub id: Option<i64>,
    pub technical_name: String,
    pub name: String,
    pub url: String,
    pub status: ModelStatus,
    pub provider: ProviderKind,
    pub capabilities: Capabilities,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub groups: BTreeSet<String>,
}

impl CatalogModel {
    /// A fresh `NEW` model with no group memberships.
    pub fn new(
        technical_name: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        provider: ProviderKind,
        capabilities: Capabilities,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            technical_name: technical_name.into(),
            name: name.into(),
            url: url.into(),
            status: ModelStatus::New,
            provider,
            capabilities,
            created: now,
            updated: now,
            groups: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditRecord
// ---------------------------------------------------------------------------

/// One observed request. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub auth_type: Option<String>,
    pub status_code: u16,
    pub duration_ms: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
