//! Flotilla entrypoint.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod settings;

use commands::Commands;
use settings::{AppConfig, LogConfig, LogFormat, StoreConfig};
use flotilla_backend::BackendRegistry;
use flotilla_core::ports::{ControlPlane, StateStore};
use flotilla_github::GitHubClient;
use flotilla_manager::{FleetDeps, FleetManager};
use flotilla_store::{Database, MemoryStore, PgStateStore};

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(author, version, about = "Self-hosted CI runner fleet manager", long_about = None)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "FLOTILLA_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log);
    config.validate()?;

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Serve => serve(config).await,
        Commands::Reconcile { once: true } => reconcile_once(config).await,
        Commands::Reconcile { once: false } => reconcile(config).await,
        Commands::Sweep => sweep(config).await,
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| log.level.clone().into());
    let json = log.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

async fn build_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    match config {
        StoreConfig::Memory => {
            warn!("Using in-memory state store, fleet state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::Postgres {
            url,
            max_connections,
        } => {
            let db = Database::connect(url, *max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.migrate().await.context("Failed to run migrations")?;
            info!("PostgreSQL state store ready");
            Ok(Arc::new(PgStateStore::new(db.pool().clone())))
        }
    }
}

async fn build_fleet(
    config: AppConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Arc<FleetManager>> {
    let store = build_store(&config.store).await?;
    let backends = BackendRegistry::from_config(&config.backends)?;
    let control_plane: Arc<dyn ControlPlane> =
        Arc::new(GitHubClient::new(config.control_plane.clone())?);

    let fleet = FleetManager::new(
        config.fleet,
        FleetDeps {
            store,
            backends,
            control_plane,
        },
        shutdown,
    )?;
    Ok(fleet)
}

/// Flip `shutdown` on Ctrl-C.
fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown.send(true);
        }
    });
}

fn check_config(config: &AppConfig) -> Result<()> {
    println!("Configuration OK");
    println!("  name prefix: {}", config.fleet.name_prefix);
    println!("  backends:    {}", config.backends.len());
    for pool in &config.fleet.pools {
        println!(
            "  pool {} -> {} (min {}, max {})",
            pool.tags, pool.backend, pool.quantity.min, pool.quantity.max
        );
    }
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let listen = config.api.listen;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let fleet = build_fleet(config, shutdown_rx.clone()).await?;
    let fleet_loop = tokio::spawn(Arc::clone(&fleet).run(shutdown_rx.clone()));

    let app = flotilla_api::create_router(Arc::new(flotilla_api::AppState::new(fleet)));
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!(%listen, "API listening");

    let mut api_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = api_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("API server failed")?;

    fleet_loop.await.context("Fleet loop panicked")??;
    info!("Stopped");
    Ok(())
}

async fn reconcile(config: AppConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let fleet = build_fleet(config, shutdown_rx.clone()).await?;
    fleet.run(shutdown_rx).await?;
    Ok(())
}

async fn reconcile_once(config: AppConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fleet = build_fleet(config, shutdown_rx).await?;

    if let Err(e) = fleet.ensure_runner_group().await {
        warn!(error = %e, "Could not ensure runner group");
    }
    let report = fleet.reconcile_all().await?;
    fleet.wait_provisioned().await;
    let _ = shutdown_tx.send(true);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn sweep(config: AppConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fleet = build_fleet(config, shutdown_rx).await?;

    let report = fleet.orphan_sweep().await?;
    let _ = shutdown_tx.send(true);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
