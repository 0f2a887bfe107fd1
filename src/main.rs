//! Fusion Swap Relayer - cross-chain atomic swaps between an EVM chain and Aptos
//!
//! The relayer accepts signed maker orders, locks both sides in hash/time
//! locked escrows and completes the swap once the maker reveals the secret.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod escrow;
mod events;
mod metrics;
mod order;
mod state;
mod swap;
mod tx;

use chain::{AptosClient, DestinationChain, EvmClient};
use config::Settings;
use events::EventBus;
use metrics::MetricsServer;
use state::{OrderJournal, OrderStore};
use swap::{SwapConfig, SwapService, SystemClock};
use tx::TransactionSender;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Fusion Swap Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Relaying {} (chain {}) -> {}",
        settings.source.name, settings.source.chain_id, settings.destination.name
    );

    // Chain adapters
    let wallet = TransactionSender::load_wallet(&settings.wallet.private_key_env)?;
    let evm = Arc::new(EvmClient::new(settings.source.clone(), wallet)?);
    let aptos_key = AptosClient::load_key(&settings.wallet.aptos_private_key_env)?;
    let aptos = Arc::new(AptosClient::new(settings.destination.clone(), aptos_key)?);
    info!("Destination account {}", aptos.account());

    if settings.destination.initialize_ledger {
        let proof = aptos.initialize_ledger().await?;
        info!("Initialized swap ledger in {}", proof);
    }

    // Order store and swap service
    let bus = EventBus::new(settings.relayer.event_buffer);
    let store = Arc::new(OrderStore::new(bus.clone()));
    let service = Arc::new(SwapService::new(
        SwapConfig {
            limit_order_protocol: evm.limit_order_protocol(),
            escrow_factory: evm.escrow_factory(),
            src_chain_id: evm.chain_id(),
            finality_margin_secs: settings.relayer.finality_margin_secs,
        },
        store,
        evm.clone(),
        aptos.clone(),
        Arc::new(SystemClock),
    ));
    info!("Swap service initialized");

    // Optional audit journal
    let journal = if settings.database.enabled {
        let journal = OrderJournal::new(&settings.database).await?;
        journal.run_migrations().await?;
        info!("Order journal connected");
        Some(journal)
    } else {
        None
    };
    let journal_handle = journal.clone().map(|journal| {
        let events = bus.subscribe();
        tokio::spawn(journal.run(events))
    });

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let service = service.clone();
        async move {
            if let Err(e) = api::run_server(config, service).await {
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

    // Health check loop
    let health_handle = tokio::spawn({
        let service = service.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let report = service.health().await;
                for chain in [&report.source, &report.destination] {
                    if !chain.reachable {
                        warn!(
                            "Chain {} health check failed: {}",
                            chain.name,
                            chain.error.as_deref().unwrap_or("unknown")
                        );
                    }
                }

                let journal_ok = match &journal {
                    Some(journal) => match journal.health_check().await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Database health check failed: {}", e);
                            false
                        }
                    },
                    None => true,
                };

                if report.healthy && journal_ok {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Fusion Swap Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    service.shutdown();

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }
    if let Some(h) = journal_handle {
        h.abort();
    }

    info!("Fusion Swap Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,fusion_swap_relayer=debug,sqlx=warn,hyper=warn")
    });

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
