//! Nonce Relayer service
//!
//! Loads configuration and signing keys, connects to the ledger, and serves
//! the status API and Prometheus metrics until shut down.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use nonce_relayer::config::Settings;
use nonce_relayer::ledger::{EthersLedger, LedgerClient};
use nonce_relayer::metrics::MetricsServer;
use nonce_relayer::wallet::Keyring;
use nonce_relayer::{api, RelayContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Nonce Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} ({} RPC endpoints)",
        settings.relayer.instance_id,
        settings.ledger.rpc_urls.len()
    );

    // Signing keys
    let keyring = Arc::new(Keyring::from_config(&settings.wallet)?);
    info!("Loaded {} signing accounts", keyring.accounts().len());

    // Ledger connection
    let ledger: Arc<dyn LedgerClient> = Arc::new(EthersLedger::new(&settings.ledger)?);
    match ledger.chain_id().await {
        Ok(chain_id) => info!("Connected to chain {}", chain_id),
        Err(e) => error!("Ledger not reachable at startup: {}", e),
    }

    let context = Arc::new(RelayContext::new(&settings, ledger, keyring));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let context = context.clone();
        async move {
            if let Err(e) = api::run_server(config, context).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Nonce Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    let stats = context.stats().await;
    info!(
        "Nonce Relayer stopped after issuing {} nonces ({} conflicts resolved)",
        stats.allocator.values_issued(),
        stats.allocator.conflicts_resolved()
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nonce_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
