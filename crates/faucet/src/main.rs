//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use evm_faucet::api::{router, AppState};
use evm_faucet::logging::init_logging;
use evm_faucet::rate_limit::OriginRateLimiter;
use evm_faucet::{
    FaucetConfig, FaucetMetrics, FaucetService, FundingWallet, JsonRpcChainClient,
    SledCooldownStore, TransactionDispatcher,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env file is fine
    let _ = dotenv::dotenv();
    let config = FaucetConfig::parse();

    init_logging(config.log_format, config.debug);
    info!("Starting faucet v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.drip_settings()?;
    let rate_limits = config.rate_limit_settings()?;
    let addr = config.listen_addr()?;

    info!("Configuration:");
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Drip amount: {}", settings.amount);
    info!("  Cooldown: {} hours", settings.cooldown_hours);
    info!(
        "  Rate limit: {} requests / {}s",
        rate_limits.max_requests,
        rate_limits.window.as_secs()
    );

    let store = Arc::new(SledCooldownStore::open(&config.db_path)?);
    info!("Cooldown store initialized at: {}", config.db_path.display());

    let wallet = FundingWallet::from_private_key(&config.private_key)?;
    let chain = Arc::new(JsonRpcChainClient::new(config.rpc_url.clone()));
    let dispatcher = TransactionDispatcher::connect(chain, wallet, &settings)
        .await
        .context("failed to reach the chain node")?;

    let metrics = Arc::new(FaucetMetrics::new()?);
    let service = Arc::new(FaucetService::new(settings, store, dispatcher, metrics));
    info!("Faucet service initialized");

    let state = AppState {
        service: service.clone(),
        rate_limiter: Arc::new(OriginRateLimiter::new(rate_limits)),
        trust_proxy_headers: config.trust_proxy_headers,
    };

    let mut app = router(state);

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app = app.layer(cors);
        info!("CORS enabled");
    }

    // Start cleanup task
    let cleanup = service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match cleanup.cleanup_expired().await {
                Ok(count) => info!("Cleaned up {} expired cooldowns", count),
                Err(e) => warn!("Cleanup failed: {:?}", e),
            }
        }
    });

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
