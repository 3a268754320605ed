use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use gateway_types::{AuditRecord, GatewayError, Result};

use crate::Store;

/// Fact keys that map onto [`AuditRecord`] fields. Everything else lands in
/// `metadata`.
pub const AUDIT_FIELDS: &[&str] = &[
    "method",
    "path",
    "user",
    "auth_type",
    "status_code",
    "duration_ms",
    "timestamp",
];

/// Best-effort audit trail writer.
///
/// `record` never fails the caller: invalid facts and storage errors are
/// logged and turn into `None`.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(&self, facts: HashMap<String, Value>) -> Option<AuditRecord> {
        let record = match audit_record_from_facts(facts) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(operation = "audit_record", error = %e, "Discarding malformed audit facts");
                return None;
            }
        };
        let method = record.method.clone();
        let path = record.path.clone();

        match self.persist(record).await {
            Ok(stored) => {
                tracing::debug!(id = ?stored.id, method = %method, path = %path, "Audit record stored");
                Some(stored)
            }
            Err(e) => {
                tracing::error!(
                    operation = "audit_record",
                    error_kind = e.kind(),
                    error = %e,
                    method = %method,
                    path = %path,
                    "Failed to store audit record"
                );
                None
            }
        }
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut uow = self.store.begin().await?;
        uow.audit_logs().recent(limit).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<AuditRecord>> {
        let mut uow = self.store.begin().await?;
        uow.audit_logs().get(id).await
    }

    async fn persist(&self, record: AuditRecord) -> Result<AuditRecord> {
        let mut uow = self.store.begin().await?;
        let stored = uow.audit_logs().add(record).await?;
        uow.commit().await?;
        Ok(stored)
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder").finish_non_exhaustive()
    }
}

/// Split loose request facts into record fields and metadata.
///
/// Null values for record fields count as absent, so an explicit
/// `"timestamp": null` still defaults to now.
pub fn audit_record_from_facts(facts: HashMap<String, Value>) -> Result<AuditRecord> {
    let mut fields = Map::new();
    let mut metadata = Map::new();
    for (key, value) in facts {
        if AUDIT_FIELDS.contains(&key.as_str()) {
            if !value.is_null() {
                fields.insert(key, value);
            }
        } else {
            metadata.insert(key, value);
        }
    }
    fields.insert("metadata".into(), Value::Object(metadata));

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| GatewayError::InvalidInput(format!("audit facts: {e}")))
}
