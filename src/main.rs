use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::server::{HttpServer, HEALTH_PATH};
use tollgate::{MemoryStore, RateLimitLayer, Reclaimer};

/// Per-identifier rate limiting HTTP service.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Tokens added per second for each identifier
    #[arg(long)]
    rate: Option<f64>,

    /// Maximum tokens per identifier
    #[arg(long)]
    burst: Option<u32>,

    /// Seconds an identifier may stay idle before it is forgotten
    #[arg(long)]
    expires_in_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut TollgateConfig) {
        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(rate) = self.rate {
            config.limiter.rate = rate;
        }
        if let Some(burst) = self.burst {
            config.limiter.burst = burst;
        }
        if let Some(expires_in_secs) = self.expires_in_secs {
            config.limiter.expires_in_secs = expires_in_secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let store = Arc::new(MemoryStore::new(config.limiter.to_limiter_config())?);
    info!(
        rate = store.rate(),
        burst = store.burst(),
        expires_in_secs = store.expires_in().as_secs(),
        "Rate limiter initialized"
    );

    let reclaimer = Reclaimer::spawn(&store, config.limiter.reclaim_interval())?;

    let rate_limit = RateLimitLayer::builder()
        .store(store.clone())
        .skipper(|parts| parts.uri.path() == HEALTH_PATH)
        .build()?;

    HttpServer::new(config.server.listen_addr, rate_limit)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    reclaimer.shutdown().await;
    info!("Tollgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
