use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use gateway_llm::ClientFactory;
use gateway_types::{CatalogModel, ConnectionConfig, GatewayError, ProviderKind, RemoteModelEntry, Result};

use crate::{Store, UnitOfWork};

pub const DEFAULT_SYNC_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// Summary types
// ---------------------------------------------------------------------------

/// Row counts from one connection's unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Remote entries without a usable identifier.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced(SyncStats),
    Failed { stage: SyncStage, error: String },
    /// Never started because the run was cancelled first.
    Cancelled,
}

/// Where a connection's sync gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    CreateClient,
    List,
    Persist,
    Task,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::CreateClient => "create_client",
            SyncStage::List => "list",
            SyncStage::Persist => "persist",
            SyncStage::Task => "task",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub connection: String,
    pub provider: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// What one reconciliation pass did, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub run_id: String,
    pub reports: Vec<ConnectionReport>,
}

impl ReconcileSummary {
    pub fn synced(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Synced(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Cancelled))
    }

    /// Totals across every connection that synced.
    pub fn totals(&self) -> SyncStats {
        self.reports
            .iter()
            .filter_map(|r| match &r.outcome {
                SyncOutcome::Synced(stats) => Some(*stats),
                _ => None,
            })
            .fold(SyncStats::default(), |acc, s| SyncStats {
                created: acc.created + s.created,
                updated: acc.updated + s.updated,
                unchanged: acc.unchanged + s.unchanged,
                skipped: acc.skipped + s.skipped,
            })
    }

    pub fn report(&self, connection: &str) -> Option<&ConnectionReport> {
        self.reports.iter().find(|r| r.connection == connection)
    }

    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

// ---------------------------------------------------------------------------
// CatalogReconciler
// ---------------------------------------------------------------------------

/// Merges every configured upstream's listing into the catalog.
///
/// Connections are independent: each gets its own scoped client and its own
/// unit of work, and a failure in one is logged and reported without
/// touching the others.
#[derive(Clone)]
pub struct CatalogReconciler {
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn Store>,
    concurrency: usize,
}

impl CatalogReconciler {
    pub fn new(factory: Arc<dyn ClientFactory>, store: Arc<dyn Store>) -> Self {
        Self {
            factory,
            store,
            concurrency: DEFAULT_SYNC_CONCURRENCY,
        }
    }

    /// Maximum number of connections synced at once (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn reconcile(&self, configs: &[ConnectionConfig]) -> ReconcileSummary {
        self.reconcile_with_cancel(configs, &CancellationToken::new())
            .await
    }

    /// Like [`reconcile`](Self::reconcile), but stops launching new
    /// connections once `cancel` fires. Connections already running finish
    /// (commit or roll back) and are awaited before this returns.
    ///
    /// Listings run concurrently; their units of work are applied strictly in
    /// configuration order, so on a shared technical name the later
    /// connection wins regardless of which upstream answered first.
    pub async fn reconcile_with_cancel(
        &self,
        configs: &[ConnectionConfig],
        cancel: &CancellationToken,
    ) -> ReconcileSummary {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("reconcile", run_id = %run_id);

        async {
            tracing::info!(connections = configs.len(), concurrency = self.concurrency, "Catalog reconciliation started");

            let mut reports: Vec<ConnectionReport> = configs
                .iter()
                .map(|c| ConnectionReport {
                    connection: c.name.clone(),
                    provider: c.provider.clone(),
                    outcome: SyncOutcome::Cancelled,
                })
                .collect();

            let permits = Arc::new(Semaphore::new(self.concurrency));
            let mut tasks = JoinSet::new();
            let mut launched = 0;

            for (index, config) in configs.iter().enumerate() {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = permits.clone().acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    tracing::warn!(remaining = configs.len() - index, "Reconciliation cancelled, not starting remaining connections");
                    break;
                };

                reports[index].outcome = SyncOutcome::Failed {
                    stage: SyncStage::Task,
                    error: "sync task did not complete".into(),
                };
                launched = index + 1;
                let factory = self.factory.clone();
                let config = config.clone();
                let span = connection_span(&config);
                tasks.spawn(
                    async move {
                        let fetched = fetch_entries(factory.as_ref(), &config).await;
                        drop(permit);
                        (index, fetched)
                    }
                    .instrument(span),
                );
            }

            let mut fetched: Vec<Option<Fetched>> = configs.iter().map(|_| None).collect();
            let mut next = 0;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, result)) => fetched[index] = Some(result),
                    Err(e) => tracing::error!(error = %e, "Connection sync task failed"),
                }
                while next < launched {
                    let Some(result) = fetched[next].take() else {
                        break;
                    };
                    reports[next].outcome = self.apply(&configs[next], result).await;
                    next += 1;
                }
            }
            // Anything still buffered sits behind a task that never reported.
            for index in next..launched {
                if let Some(result) = fetched[index].take() {
                    reports[index].outcome = self.apply(&configs[index], result).await;
                }
            }

            let summary = ReconcileSummary { run_id: run_id.clone(), reports };
            let totals = summary.totals();
            tracing::info!(
                synced = summary.synced(),
                failed = summary.failed(),
                cancelled = summary.cancelled(),
                created = totals.created,
                updated = totals.updated,
                "Catalog reconciliation finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    /// Sync a single connection, returning the error instead of a report.
    pub async fn reconcile_connection(&self, config: &ConnectionConfig) -> Result<SyncStats> {
        let entries = fetch_entries(self.factory.as_ref(), config).await.map_err(|(_, e)| e)?;
        persist_entries(self.store.as_ref(), config, entries).await
    }

    /// Persist one connection's listing, or report why there is none.
    async fn apply(&self, config: &ConnectionConfig, fetched: Fetched) -> SyncOutcome {
        async {
            let entries = match fetched {
                Ok(entries) => entries,
                Err((stage, e)) => return failed(config, stage, e),
            };
            match persist_entries(self.store.as_ref(), config, entries).await {
                Ok(stats) => {
                    tracing::info!(
                        created = stats.created,
                        updated = stats.updated,
                        unchanged = stats.unchanged,
                        skipped = stats.skipped,
                        "Connection synced"
                    );
                    SyncOutcome::Synced(stats)
                }
                Err(e) => failed(config, SyncStage::Persist, e),
            }
        }
        .instrument(connection_span(config))
        .await
    }
}

impl std::fmt::Debug for CatalogReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogReconciler")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

fn connection_span(config: &ConnectionConfig) -> tracing::Span {
    tracing::info_span!("connection", config = %config.name, provider = %config.provider)
}

fn failed(config: &ConnectionConfig, stage: SyncStage, e: GatewayError) -> SyncOutcome {
    if e.is_upstream() {
        tracing::warn!(
            config = %config.name,
            provider = %config.provider,
            operation = stage.as_str(),
            error_kind = e.kind(),
            error = %e,
            "Upstream unavailable, connection skipped this pass"
        );
    } else {
        tracing::error!(
            config = %config.name,
            provider = %config.provider,
            operation = stage.as_str(),
            error_kind = e.kind(),
            error = %e,
            "Connection skipped this pass"
        );
    }
    SyncOutcome::Failed {
        stage,
        error: e.to_string(),
    }
}

/// A connection's listing, or the stage it failed at.
type Fetched = std::result::Result<Vec<RemoteModelEntry>, (SyncStage, GatewayError)>;

/// Open a scoped client and list. The client is released before returning,
/// on success and on failure.
async fn fetch_entries(factory: &dyn ClientFactory, config: &ConnectionConfig) -> Fetched {
    let client = factory
        .create_client(config)
        .map_err(|e| (SyncStage::CreateClient, e))?;
    let operation = client.client().operation();
    tracing::debug!(operation, "Listing remote entries");
    client
        .list_entries()
        .await
        .map_err(|e| (SyncStage::List, e))
}

async fn persist_entries(
    store: &dyn Store,
    config: &ConnectionConfig,
    entries: Vec<RemoteModelEntry>,
) -> Result<SyncStats> {
    let mut uow = store.begin().await?;
    match upsert_all(uow.as_mut(), config, &entries).await {
        Ok(stats) => {
            uow.commit().await?;
            Ok(stats)
        }
        Err(e) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

async fn upsert_all(
    uow: &mut dyn UnitOfWork,
    config: &ConnectionConfig,
    entries: &[RemoteModelEntry],
) -> Result<SyncStats> {
    let mut stats = SyncStats::default();
    for entry in entries {
        let technical_name = entry.id.trim();
        if technical_name.is_empty() {
            tracing::warn!(payload = %entry.payload, "Skipping remote entry without an id");
            stats.skipped += 1;
            continue;
        }
        let capabilities = entry.capabilities();

        match uow.models().get_by_name(technical_name).await? {
            Some(existing) => {
                if is_current(&existing, &config.base_url, entry.provider, &capabilities) {
                    stats.unchanged += 1;
                    continue;
                }
                let refreshed = CatalogModel {
                    url: config.base_url.clone(),
                    provider: entry.provider,
                    capabilities,
                    updated: Utc::now(),
                    ..existing
                };
                uow.models().update(refreshed).await?;
                tracing::debug!(model = technical_name, "Catalog model updated");
                stats.updated += 1;
            }
            None => {
                let model = CatalogModel::new(
                    technical_name,
                    technical_name,
                    &config.base_url,
                    entry.provider,
                    capabilities,
                );
                uow.models().add(model).await?;
                tracing::debug!(model = technical_name, "Catalog model created");
                stats.created += 1;
            }
        }
    }
    Ok(stats)
}

fn is_current(
    model: &CatalogModel,
    url: &str,
    provider: ProviderKind,
    capabilities: &gateway_types::Capabilities,
) -> bool {
    model.url == url && model.provider == provider && &model.capabilities == capabilities
}
