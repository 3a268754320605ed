use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use gateway_types::{AuditRecord, Capabilities, CatalogModel, GatewayError, Result};

use crate::{AuditLogRepository, ModelRepository, Store, UnitOfWork};

type ModelRow = (i64, String, String, String, String, String, String, String, String);
type AuditRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    f64,
    String,
);

/// SQLite-backed store. Every unit of work is one database transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and create the schema.
    ///
    /// An in-memory database (`sqlite::memory:`) exists per connection, so
    /// its pool is pinned to one connection that is never reaped, whatever
    /// `max_connections` says.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = pool_options(url, max_connections)
            .connect(url)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        tracing::debug!(url, max_connections, "Opened catalog database");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_models (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                technical_name TEXT    NOT NULL UNIQUE,
                name           TEXT    NOT NULL,
                url            TEXT    NOT NULL,
                status         TEXT    NOT NULL,
                provider       TEXT    NOT NULL,
                capabilities   TEXT    NOT NULL DEFAULT '{}',
                created        TEXT    NOT NULL,
                updated        TEXT    NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_groups (
                model_id   INTEGER NOT NULL REFERENCES catalog_models(id) ON DELETE CASCADE,
                group_name TEXT    NOT NULL,
                PRIMARY KEY (model_id, group_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT    NOT NULL,
                method      TEXT    NOT NULL,
                path        TEXT    NOT NULL,
                user        TEXT,
                auth_type   TEXT,
                status_code INTEGER NOT NULL,
                duration_ms REAL    NOT NULL,
                metadata    TEXT    NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(SqliteUnitOfWork { tx }))
    }
}

/// Dropping the transaction without committing rolls it back.
struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteUnitOfWork {
    async fn load_groups(&mut self, model_id: i64) -> Result<BTreeSet<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT group_name FROM model_groups WHERE model_id = ? ORDER BY group_name",
        )
        .bind(model_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|(g,)| g).collect())
    }

    async fn store_groups(&mut self, model_id: i64, groups: &BTreeSet<String>) -> Result<()> {
        sqlx::query("DELETE FROM model_groups WHERE model_id = ?")
            .bind(model_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        for group in groups {
            sqlx::query("INSERT INTO model_groups (model_id, group_name) VALUES (?, ?)")
                .bind(model_id)
                .bind(group)
                .execute(&mut *self.tx)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn hydrate(&mut self, row: Option<ModelRow>) -> Result<Option<CatalogModel>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut model = model_from_row(row)?;
        if let Some(id) = model.id {
            model.groups = self.load_groups(id).await?;
        }
        Ok(Some(model))
    }
}

const MODEL_COLUMNS: &str =
    "id, technical_name, name, url, status, provider, capabilities, created, updated";

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    fn models(&mut self) -> &mut dyn ModelRepository {
        self
    }

    fn audit_logs(&mut self) -> &mut dyn AuditLogRepository {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}

#[async_trait]
impl ModelRepository for SqliteUnitOfWork {
    async fn get_by_name(&mut self, technical_name: &str) -> Result<Option<CatalogModel>> {
        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM catalog_models WHERE technical_name = ?"
        ))
        .bind(technical_name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        self.hydrate(row).await
    }

    async fn get_by_id(&mut self, id: i64) -> Result<Option<CatalogModel>> {
        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM catalog_models WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        self.hydrate(row).await
    }

    async fn add(&mut self, mut model: CatalogModel) -> Result<CatalogModel> {
        let result = sqlx::query(
            r#"
            INSERT INTO catalog_models
                (technical_name, name, url, status, provider, capabilities, created, updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.technical_name)
        .bind(&model.name)
        .bind(&model.url)
        .bind(model.status.as_str())
        .bind(model.provider.as_str())
        .bind(serde_json::to_string(&model.capabilities)?)
        .bind(format_time(&model.created))
        .bind(format_time(&model.updated))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let id = result.last_insert_rowid();
        self.store_groups(id, &model.groups).await?;
        model.id = Some(id);
        Ok(model)
    }

    async fn update(&mut self, model: CatalogModel) -> Result<CatalogModel> {
        let not_found = || GatewayError::NotFound {
            entity: "Model".into(),
            id: model.id.map(|id| id.to_string()).unwrap_or_default(),
        };
        let id = model.id.ok_or_else(not_found)?;
        let result = sqlx::query(
            r#"
            UPDATE catalog_models
            SET technical_name = ?, name = ?, url = ?, status = ?, provider = ?,
                capabilities = ?, created = ?, updated = ?
            WHERE id = ?
            "#,
        )
        .bind(&model.technical_name)
        .bind(&model.name)
        .bind(&model.url)
        .bind(model.status.as_str())
        .bind(model.provider.as_str())
        .bind(serde_json::to_string(&model.capabilities)?)
        .bind(format_time(&model.created))
        .bind(format_time(&model.updated))
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        self.store_groups(id, &model.groups).await?;
        Ok(model)
    }

    async fn remove(&mut self, id: i64) -> Result<bool> {
        sqlx::query("DELETE FROM model_groups WHERE model_id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        let result = sqlx::query("DELETE FROM catalog_models WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&mut self) -> Result<Vec<CatalogModel>> {
        let rows = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM catalog_models ORDER BY technical_name"
        ))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(model) = self.hydrate(Some(row)).await? {
                models.push(model);
            }
        }
        Ok(models)
    }
}

#[async_trait]
impl AuditLogRepository for SqliteUnitOfWork {
    async fn add(&mut self, mut record: AuditRecord) -> Result<AuditRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs
                (timestamp, method, path, user, auth_type, status_code, duration_ms, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_time(&record.timestamp))
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.user)
        .bind(&record.auth_type)
        .bind(i64::from(record.status_code))
        .bind(record.duration_ms)
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        record.id = Some(result.last_insert_rowid());
        Ok(record)
    }

    async fn recent(&mut self, limit: usize) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, timestamp, method, path, user, auth_type, status_code, duration_ms, metadata
            FROM audit_logs
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(audit_from_row).collect()
    }

    async fn get(&mut self, id: i64) -> Result<Option<AuditRecord>> {
        let row = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, timestamp, method, path, user, auth_type, status_code, duration_ms, metadata
            FROM audit_logs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        row.map(audit_from_row).transpose()
    }
}


fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn pool_options(url: &str, max_connections: u32) -> SqlitePoolOptions {
    let options = SqlitePoolOptions::new().max_connections(max_connections.max(1));
    if is_in_memory(url) {
        options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options
    }
}

fn db_err(e: sqlx::Error) -> GatewayError {
    GatewayError::Persistence(e.to_string())
}

/// Fixed-width UTC timestamps, so text order is time order.
fn format_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GatewayError::Persistence(format!("bad timestamp '{value}': {e}")))
}

fn model_from_row(row: ModelRow) -> Result<CatalogModel> {
    let (id, technical_name, name, url, status, provider, capabilities, created, updated) = row;
    let capabilities: Capabilities = serde_json::from_str(&capabilities)?;
    Ok(CatalogModel {
        id: Some(id),
        technical_name,
        name,
        url,
        status: status.parse()?,
        provider: provider.parse()?,
        capabilities,
        created: parse_time(&created)?,
        updated: parse_time(&updated)?,
        groups: BTreeSet::new(),
    })
}

fn audit_from_row(row: AuditRow) -> Result<AuditRecord> {
    let (id, timestamp, method, path, user, auth_type, status_code, duration_ms, metadata) = row;
    Ok(AuditRecord {
        id: Some(id),
        timestamp: parse_time(&timestamp)?,
        method,
        path,
        user,
        auth_type,
        status_code: u16::try_from(status_code)
            .map_err(|_| GatewayError::Persistence(format!("bad status code {status_code}")))?,
        duration_ms,
        metadata: serde_json::from_str(&metadata)?,
    })
}
