//! CLI binary for syncing and inspecting the gateway model catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use gateway_catalog::{CatalogReconciler, SqliteStore, Store, SyncOutcome};
use gateway_llm::{ClientFactory, ProviderClientFactory};
use gateway_net::{ProxyAuth, TransportFactory};
use gateway_types::{GatewayConfig, NetworkSettings};

#[derive(Parser)]
#[command(name = "gatewayctl", version, about = "Sync and inspect the LLM gateway model catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every configured connection into the catalog
    Sync {
        /// Path to the gateway config file
        #[arg(short, long, default_value = "gateway.json")]
        config: PathBuf,

        /// Override the number of connections synced at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the catalog
    Catalog {
        /// Path to the gateway config file
        #[arg(short, long, default_value = "gateway.json")]
        config: PathBuf,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// List what one connection's upstream reports, without touching the catalog
    List {
        /// Path to the gateway config file
        #[arg(short, long, default_value = "gateway.json")]
        config: PathBuf,

        /// Connection name
        connection: String,
    },

    /// Show which proxy a request to URL would use
    ResolveProxy {
        /// Target URL
        url: String,

        /// Explicit proxy URL (empty string forces a direct connection)
        #[arg(long)]
        proxy: Option<String>,

        /// Explicit proxy username
        #[arg(long, requires = "proxy_password")]
        proxy_username: Option<String>,

        /// Explicit proxy password
        #[arg(long, requires = "proxy_username")]
        proxy_password: Option<String>,
    },

    /// Send a GET to URL through the resolved proxy and print the status
    Probe {
        /// Target URL
        url: String,

        /// Explicit proxy URL (empty string forces a direct connection)
        #[arg(long)]
        proxy: Option<String>,

        /// Extra CA bundle (PEM)
        #[arg(long)]
        ca_cert: Option<PathBuf>,

        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,

        /// Request timeout in seconds
        #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync {
            config,
            concurrency,
            json,
        } => {
            cmd_sync(&config, concurrency, json).await?;
        }
        Commands::Catalog { config, json } => {
            cmd_catalog(&config, json).await?;
        }
        Commands::List { config, connection } => {
            cmd_list(&config, &connection).await?;
        }
        Commands::ResolveProxy {
            url,
            proxy,
            proxy_username,
            proxy_password,
        } => {
            let auth = proxy_username
                .zip(proxy_password)
                .map(|(user, pass)| ProxyAuth::new(user, pass));
            cmd_resolve_proxy(&url, proxy.as_deref(), auth)?;
        }
        Commands::Probe {
            url,
            proxy,
            ca_cert,
            insecure,
            timeout,
        } => {
            let settings = NetworkSettings {
                proxy_url: proxy,
                verify_ssl: !insecure,
                ca_cert_file: ca_cert,
                timeout_secs: timeout,
                ..NetworkSettings::default()
            };
            cmd_probe(url, settings).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    GatewayConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

async fn open_store(config: &GatewayConfig) -> anyhow::Result<SqliteStore> {
    let store = SqliteStore::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("opening catalog database {}", config.database_url))?;
    Ok(store)
}

async fn cmd_sync(path: &Path, concurrency: Option<usize>, json: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    if config.connections.is_empty() {
        println!("No connections configured in {}", path.display());
        return Ok(());
    }
    let store = Arc::new(open_store(&config).await?);
    let factory = Arc::new(ProviderClientFactory::new(TransportFactory::from_process_env()));
    let reconciler = CatalogReconciler::new(factory, store)
        .with_concurrency(concurrency.unwrap_or(config.sync_concurrency));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing connections already in progress");
            on_signal.cancel();
        }
    });

    let summary = reconciler
        .reconcile_with_cancel(&config.connections, &cancel)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Run {}", summary.run_id);
        for report in &summary.reports {
            match &report.outcome {
                SyncOutcome::Synced(stats) => println!(
                    "  {:<24} {:<8} synced   created={} updated={} unchanged={} skipped={}",
                    report.connection,
                    report.provider,
                    stats.created,
                    stats.updated,
                    stats.unchanged,
                    stats.skipped
                ),
                SyncOutcome::Failed { stage, error } => println!(
                    "  {:<24} {:<8} FAILED   [{}] {}",
                    report.connection,
                    report.provider,
                    stage.as_str(),
                    error
                ),
                SyncOutcome::Cancelled => println!(
                    "  {:<24} {:<8} cancelled",
                    report.connection, report.provider
                ),
            }
        }
        println!(
            "{} synced, {} failed, {} cancelled",
            summary.synced(),
            summary.failed(),
            summary.cancelled()
        );
    }

    if summary.synced() == 0 && summary.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_catalog(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let store = open_store(&config).await?;
    let mut uow = store.begin().await?;
    let models = uow.models().list().await?;
    uow.rollback().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    if models.is_empty() {
        println!("Catalog is empty");
        return Ok(());
    }
    for model in &models {
        let groups: Vec<&str> = model.groups.iter().map(String::as_str).collect();
        println!(
            "{:<40} {:<10} {:<7} {}{}",
            model.technical_name,
            model.status.as_str(),
            model.provider.as_str(),
            model.url,
            if groups.is_empty() {
                String::new()
            } else {
                format!("  groups={}", groups.join(","))
            }
        );
    }
    println!("\n{} models", models.len());
    Ok(())
}

async fn cmd_list(path: &Path, name: &str) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let connection = config
        .connection(name)
        .with_context(|| format!("no connection named '{name}' in {}", path.display()))?;

    let factory = ProviderClientFactory::new(TransportFactory::from_process_env());
    let client = factory.create_client(connection)?;
    let entries = client.list_entries().await?;

    println!(
        "{} ({}, {}): {} entries",
        connection.name,
        client.provider(),
        client.client().operation(),
        entries.len()
    );
    for entry in &entries {
        println!("  {}", entry.id);
    }
    Ok(())
}

fn cmd_resolve_proxy(url: &str, proxy: Option<&str>, auth: Option<ProxyAuth>) -> anyhow::Result<()> {
    let transport = TransportFactory::from_process_env();
    let descriptor = transport.resolver().resolve(url, proxy, auth)?;
    println!("{url} -> {descriptor}");
    Ok(())
}

/// The blocking client is built, used and dropped on a blocking thread.
async fn cmd_probe(url: String, settings: NetworkSettings) -> anyhow::Result<()> {
    let (status, proxy) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let transport = TransportFactory::from_process_env();
        let proxy = transport
            .resolver()
            .resolve(&url, settings.proxy_url.as_deref(), None)?;
        let client = transport.blocking_client(&url, &settings)?;
        let response = client
            .get(&url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        Ok((response.status(), proxy))
    })
    .await??;

    println!("{status} (via {proxy})");
    Ok(())
}
