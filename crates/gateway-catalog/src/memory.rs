use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use gateway_types::{AuditRecord, CatalogModel, GatewayError, Result};

use crate::{AuditLogRepository, ModelRepository, Store, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    models: BTreeMap<i64, CatalogModel>,
    audit: BTreeMap<i64, AuditRecord>,
    next_model_id: i64,
    next_audit_id: i64,
}

/// In-process store. Units of work run one at a time on a private copy of
/// the state, which replaces the shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn models(&mut self) -> &mut dyn ModelRepository {
        self
    }

    fn audit_logs(&mut self) -> &mut dyn AuditLogRepository {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ModelRepository for MemoryUnitOfWork {
    async fn get_by_name(&mut self, technical_name: &str) -> Result<Option<CatalogModel>> {
        Ok(self
            .working
            .models
            .values()
            .find(|m| m.technical_name == technical_name)
            .cloned())
    }

    async fn get_by_id(&mut self, id: i64) -> Result<Option<CatalogModel>> {
        Ok(self.working.models.get(&id).cloned())
    }

    async fn add(&mut self, mut model: CatalogModel) -> Result<CatalogModel> {
        if self
            .working
            .models
            .values()
            .any(|m| m.technical_name == model.technical_name)
        {
            return Err(GatewayError::Persistence(format!(
                "model '{}' already exists",
                model.technical_name
            )));
        }
        self.working.next_model_id += 1;
        let id = self.working.next_model_id;
        model.id = Some(id);
        self.working.models.insert(id, model.clone());
        Ok(model)
    }

    async fn update(&mut self, model: CatalogModel) -> Result<CatalogModel> {
        let id = model
            .id
            .filter(|id| self.working.models.contains_key(id))
            .ok_or_else(|| GatewayError::NotFound {
                entity: "Model".into(),
                id: model.id.map(|id| id.to_string()).unwrap_or_default(),
            })?;
        if self
            .working
            .models
            .values()
            .any(|m| m.id != Some(id) && m.technical_name == model.technical_name)
        {
            return Err(GatewayError::Persistence(format!(
                "model '{}' already exists",
                model.technical_name
            )));
        }
        self.working.models.insert(id, model.clone());
        Ok(model)
    }

    async fn remove(&mut self, id: i64) -> Result<bool> {
        Ok(self.working.models.remove(&id).is_some())
    }

    async fn list(&mut self) -> Result<Vec<CatalogModel>> {
        let mut models: Vec<_> = self.working.models.values().cloned().collect();
        models.sort_by(|a, b| a.technical_name.cmp(&b.technical_name));
        Ok(models)
    }
}

#[async_trait]
impl AuditLogRepository for MemoryUnitOfWork {
    async fn add(&mut self, mut record: AuditRecord) -> Result<AuditRecord> {
        self.working.next_audit_id += 1;
        let id = self.working.next_audit_id;
        record.id = Some(id);
        self.working.audit.insert(id, record.clone());
        Ok(record)
    }

    async fn recent(&mut self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<_> = self.working.audit.values().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn get(&mut self, id: i64) -> Result<Option<AuditRecord>> {
        Ok(self.working.audit.get(&id).cloned())
    }
}
