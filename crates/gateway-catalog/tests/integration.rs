//! End-to-end tests for catalog reconciliation and audit recording.
//!
//! Each test runs the real provider client factory against wiremock upstreams
//! and checks what lands in the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gateway_catalog::{
    AuditRecorder, CatalogReconciler, MemoryStore, SqliteStore, Store, SyncOutcome, SyncStage,
};
use gateway_llm::{ProviderClientFactory, RetryConfig};
use gateway_net::{ProxyResolver, StaticEnv, TransportFactory};
use gateway_types::{
    AzureAdCredentials, CatalogModel, ConnectionConfig, ModelStatus, ProviderKind,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn factory() -> Arc<ProviderClientFactory> {
    let resolver = ProxyResolver::new(Arc::new(StaticEnv::new()));
    Arc::new(
        ProviderClientFactory::new(TransportFactory::new(resolver))
            .with_retry(RetryConfig::disabled()),
    )
}

async fn sqlite_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("catalog.db").display());
    let store = SqliteStore::connect(&url, 1).await.unwrap();
    (dir, store)
}

async fn catalog(store: &dyn Store) -> Vec<CatalogModel> {
    let mut uow = store.begin().await.unwrap();
    uow.models().list().await.unwrap()
}

async fn mock_openai(server: &MockServer, models: &[&str]) {
    let data: Vec<Value> = models
        .iter()
        .map(|id| json!({"id": id, "object": "model", "owned_by": "openai"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": data})))
        .mount(server)
        .await;
}

async fn mock_azure(server: &MockServer, deployments: &[(&str, &str)]) {
    let data: Vec<Value> = deployments
        .iter()
        .map(|(id, model)| json!({"id": id, "model": model, "status": "succeeded"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/openai/deployments"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": data})))
        .mount(server)
        .await;
}

fn openai_config(name: &str, server: &MockServer) -> ConnectionConfig {
    ConnectionConfig::with_api_key(name, "openai", format!("{}/v1", server.uri()), "sk-test")
}

fn azure_config(name: &str, server: &MockServer) -> ConnectionConfig {
    ConnectionConfig::with_api_key(name, "azure_openai", server.uri(), "azure-key")
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_and_azure_connections_fill_the_catalog() {
    let openai = MockServer::start().await;
    let azure = MockServer::start().await;
    mock_openai(&openai, &["gpt-4o", "text-embedding-3-small"]).await;
    mock_azure(&azure, &[("chat-prod", "gpt-4"), ("embed", "text-embedding-ada-002")]).await;

    let (_dir, store) = sqlite_store().await;
    let store = Arc::new(store);
    let reconciler = CatalogReconciler::new(factory(), store.clone());

    let summary = reconciler
        .reconcile(&[openai_config("oa", &openai), azure_config("az", &azure)])
        .await;
    assert_eq!(summary.synced(), 2);
    assert_eq!(summary.totals().created, 4);

    let models = catalog(store.as_ref()).await;
    let names: Vec<_> = models.iter().map(|m| m.technical_name.as_str()).collect();
    assert_eq!(names, vec!["chat-prod", "embed", "gpt-4o", "text-embedding-3-small"]);

    let chat = &models[0];
    assert_eq!(chat.provider, ProviderKind::Azure);
    assert_eq!(chat.status, ModelStatus::New);
    assert_eq!(chat.url, azure.uri());
    assert_eq!(chat.capabilities.get("chat_completions"), Some(&json!(true)));
    assert_eq!(models[2].provider, ProviderKind::OpenAi);
    assert_eq!(models[2].url, format!("{}/v1", openai.uri()));
}

#[tokio::test]
async fn rejected_service_principal_does_not_block_other_connections() {
    let openai = MockServer::start().await;
    mock_openai(&openai, &["gpt-4o", "o3"]).await;

    let login = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .mount(&login)
        .await;

    let azure_ad = ConnectionConfig::with_azure_ad(
        "az-ad",
        "https://acct-ai.openai.azure.com",
        AzureAdCredentials {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "wrong".into(),
            subscription_id: "sub-1".into(),
            resource_group: "rg-ai".into(),
            account_name: "acct-ai".into(),
            authority_host: login.uri(),
            management_endpoint: login.uri(),
        },
    );

    let store = Arc::new(MemoryStore::new());
    let summary = CatalogReconciler::new(factory(), store.clone())
        .reconcile(&[azure_ad, openai_config("oa", &openai)])
        .await;

    match &summary.report("az-ad").unwrap().outcome {
        SyncOutcome::Failed { stage, error } => {
            assert_eq!(*stage, SyncStage::List);
            assert!(error.contains("Invalid client secret"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(catalog(store.as_ref()).await.len(), 2);
}

#[tokio::test]
async fn service_principal_lists_through_management_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "mgmt-token",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/resourceGroups/rg-ai/providers/Microsoft.CognitiveServices/accounts/acct-ai/deployments",
        ))
        .and(query_param("api-version", gateway_llm::MANAGEMENT_API_VERSION))
        .and(header("Authorization", "Bearer mgmt-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": "chat-prod",
                "sku": {"name": "Standard", "capacity": 10},
                "properties": {
                    "model": {"format": "OpenAI", "name": "gpt-4o", "version": "2024-05-13"},
                    "provisioningState": "Succeeded"
                }
            }]
        })))
        .mount(&server)
        .await;

    let config = ConnectionConfig::with_azure_ad(
        "az-ad",
        "https://acct-ai.openai.azure.com",
        AzureAdCredentials {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            subscription_id: "sub-1".into(),
            resource_group: "rg-ai".into(),
            account_name: "acct-ai".into(),
            authority_host: server.uri(),
            management_endpoint: server.uri(),
        },
    );

    let (_dir, store) = sqlite_store().await;
    let store = Arc::new(store);
    let summary = CatalogReconciler::new(factory(), store.clone())
        .reconcile(&[config])
        .await;
    assert_eq!(summary.synced(), 1);

    let models = catalog(store.as_ref()).await;
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].technical_name, "chat-prod");
    assert_eq!(models[0].url, "https://acct-ai.openai.azure.com");
    assert_eq!(models[0].capabilities.get("chat_completions"), Some(&json!(true)));
}

#[tokio::test]
async fn repeated_passes_do_not_duplicate_rows() {
    let openai = MockServer::start().await;
    mock_openai(&openai, &["gpt-4o", "o3"]).await;

    let (_dir, store) = sqlite_store().await;
    let store = Arc::new(store);
    let reconciler = CatalogReconciler::new(factory(), store.clone());
    let configs = [openai_config("oa", &openai)];

    reconciler.reconcile(&configs).await;
    let before = catalog(store.as_ref()).await;
    let summary = reconciler.reconcile(&configs).await;
    let after = catalog(store.as_ref()).await;

    assert_eq!(summary.totals().unchanged, 2);
    assert_eq!(before, after);
}

#[tokio::test]
async fn shared_technical_name_takes_the_later_connection() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"id": "gpt-4"}]}))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&first)
        .await;
    mock_azure(&second, &[("gpt-4", "gpt-4")]).await;

    let store = Arc::new(MemoryStore::new());
    CatalogReconciler::new(factory(), store.clone())
        .reconcile(&[openai_config("oa", &first), azure_config("az", &second)])
        .await;

    let models = catalog(store.as_ref()).await;
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].provider, ProviderKind::Azure);
    assert_eq!(models[0].url, second.uri());
    assert_eq!(models[0].capabilities.get("chat_completions"), Some(&json!(true)));
}

#[tokio::test]
async fn update_keeps_curated_fields() {
    let azure = MockServer::start().await;
    mock_azure(&azure, &[("chat-prod", "gpt-4")]).await;

    let (_dir, store) = sqlite_store().await;
    let store = Arc::new(store);
    {
        let mut uow = store.begin().await.unwrap();
        let mut model = CatalogModel::new(
            "chat-prod",
            "Production chat",
            "https://old.example.com",
            ProviderKind::Azure,
            HashMap::new(),
        );
        model.status = ModelStatus::Approved;
        model.groups.insert("analysts".into());
        uow.models().add(model).await.unwrap();
        uow.commit().await.unwrap();
    }
    let original = catalog(store.as_ref()).await.remove(0);

    CatalogReconciler::new(factory(), store.clone())
        .reconcile(&[azure_config("az", &azure)])
        .await;

    let updated = catalog(store.as_ref()).await.remove(0);
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.name, "Production chat");
    assert_eq!(updated.status, ModelStatus::Approved);
    assert_eq!(updated.groups, original.groups);
    assert_eq!(updated.created, original.created);
    assert_eq!(updated.url, azure.uri());
    assert!(!updated.capabilities.is_empty());
}

#[tokio::test]
async fn cancellation_stops_new_work_but_finishes_running_work() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"id": "gpt-4o"}]}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&slow)
        .await;
    let other = MockServer::start().await;
    mock_openai(&other, &["o3"]).await;

    let store = Arc::new(MemoryStore::new());
    let reconciler = CatalogReconciler::new(factory(), store.clone()).with_concurrency(1);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = reconciler
        .reconcile_with_cancel(&[openai_config("slow", &slow), openai_config("other", &other)], &cancel)
        .await;

    assert!(matches!(summary.report("slow").unwrap().outcome, SyncOutcome::Synced(_)));
    assert_eq!(summary.report("other").unwrap().outcome, SyncOutcome::Cancelled);
    let names: Vec<_> = catalog(store.as_ref())
        .await
        .into_iter()
        .map(|m| m.technical_name)
        .collect();
    assert_eq!(names, vec!["gpt-4o"]);
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_records_round_trip_through_sqlite() {
    let (_dir, store) = sqlite_store().await;
    let recorder = AuditRecorder::new(Arc::new(store));

    let facts: HashMap<String, Value> = serde_json::from_value(json!({
        "method": "POST",
        "path": "/v1/chat/completions",
        "user": "alice",
        "auth_type": "bearer",
        "status_code": 200,
        "duration_ms": 184.2,
        "timestamp": "2024-06-01T08:30:00Z",
        "model": "gpt-4o",
        "request_id": "req-123"
    }))
    .unwrap();

    let stored = recorder.record(facts).await.unwrap();
    let id = stored.id.unwrap();
    let loaded = recorder.get(id).await.unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert_eq!(loaded.metadata["request_id"], json!("req-123"));
    assert_eq!(loaded.timestamp.to_rfc3339(), "2024-06-01T08:30:00+00:00");
    assert_eq!(recorder.recent(5).await.unwrap().len(), 1);
}
