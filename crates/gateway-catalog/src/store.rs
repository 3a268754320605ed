use async_trait::async_trait;

use gateway_types::{AuditRecord, CatalogModel, Result};

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// Catalog rows, keyed by storage id and uniquely by technical name.
#[async_trait]
pub trait ModelRepository: Send {
    async fn get_by_name(&mut self, technical_name: &str) -> Result<Option<CatalogModel>>;
    async fn get_by_id(&mut self, id: i64) -> Result<Option<CatalogModel>>;
    /// Insert a new row; the returned copy carries the assigned id.
    async fn add(&mut self, model: CatalogModel) -> Result<CatalogModel>;
    /// Overwrite the row with `model.id`. `NotFound` when there is no such row.
    async fn update(&mut self, model: CatalogModel) -> Result<CatalogModel>;
    /// Returns whether a row was removed.
    async fn remove(&mut self, id: i64) -> Result<bool>;
    /// All rows ordered by technical name.
    async fn list(&mut self) -> Result<Vec<CatalogModel>>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLogRepository: Send {
    async fn add(&mut self, record: AuditRecord) -> Result<AuditRecord>;
    /// Newest first.
    async fn recent(&mut self, limit: usize) -> Result<Vec<AuditRecord>>;
    async fn get(&mut self, id: i64) -> Result<Option<AuditRecord>>;
}

// ---------------------------------------------------------------------------
// UnitOfWork / Store
// ---------------------------------------------------------------------------

/// One transaction over the catalog and the audit log.
///
/// Nothing is visible to other units of work until `commit`. Dropping an
/// uncommitted unit of work discards its changes.
#[async_trait]
pub trait UnitOfWork: Send {
    fn models(&mut self) -> &mut dyn ModelRepository;
    fn audit_logs(&mut self) -> &mut dyn AuditLogRepository;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}
