//! Vigil server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::config::AppConfig;
use vigil_server::{AppState, create_router};

/// Vigil - vote ledger service
#[derive(Parser, Debug)]
#[command(name = "vigild")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "VIGIL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Vigil v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    vigil_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let metadata = vigil_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), metadata);

    if config.votes.reconcile_on_startup {
        tracing::info!("Reconciling vote counters before accepting requests");
        state
            .engine
            .reconcile_all()
            .await
            .context("startup counter reconciliation failed")?;
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from the optional TOML file, overridden by `VIGIL_`
/// environment variables (`VIGIL_SERVER__BIND`, `VIGIL_METADATA__TYPE`, ...).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path,
            "No config file found, using defaults and environment variables"
        );
    }

    figment
        .merge(Env::prefixed("VIGIL_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")
}
