//! Model catalog and audit trail.
//!
//! - `Store` / `UnitOfWork`: transactional access to the catalog and audit log
//! - `MemoryStore`, `SqliteStore`: the two store backends
//! - `CatalogReconciler`: merges every upstream's listing into the catalog
//! - `AuditRecorder`: best-effort recording of observed requests

mod audit;
mod memory;
mod reconciler;
mod sqlite;
mod store;

pub use audit::*;
pub use memory::MemoryStore;
pub use reconciler::*;
pub use sqlite::SqliteStore;
pub use store::*;
