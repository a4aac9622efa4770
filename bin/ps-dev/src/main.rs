//! PaySentry Development Server
//!
//! All-in-one binary for local development containing:
//! - Failover simulation engine (transaction generator, metrics registry,
//!   circuit breakers, load balancer, alert engine)
//! - REST API for monitoring and control

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ps_api::{create_router, ApiState};
use ps_engine::{EngineConfig, FailoverEngine};

/// PaySentry Development Server
#[derive(Parser, Debug)]
#[command(name = "ps-dev")]
#[command(about = "PaySentry Simulation Server - engine and API in one binary")]
struct Args {
    /// API server port
    #[arg(long, env = "PS_PORT", default_value = "3000")]
    port: u16,

    /// Bind address
    #[arg(long, env = "PS_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Start the simulation immediately
    #[arg(long, env = "PS_AUTO_START", default_value = "true")]
    auto_start: bool,

    /// Seconds between metric propagation ticks
    #[arg(long, env = "PS_TICK_INTERVAL_SECS", default_value = "5")]
    tick_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    let args = Args::parse();

    info!("Starting PaySentry Dev Server");
    info!("API port: {}, auto-start: {}", args.port, args.auto_start);

    // Setup shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // 1. Build the failover engine
    let config = EngineConfig {
        tick_interval: Duration::from_secs(args.tick_interval_secs),
        ..EngineConfig::default()
    };
    let engine = Arc::new(FailoverEngine::new(config)?);
    info!(
        providers = engine.config().providers.len(),
        "Failover engine initialized"
    );

    // 2. Optionally start the simulation loops
    if args.auto_start {
        engine.clone().start();
        info!("Simulation auto-started");
    }

    // 3. Start API server
    let app = create_router(ApiState::new(engine.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("{}:{}", args.host, args.port);
    info!("API server listening on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    let api_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let server = axum::serve(listener, app);
            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!("API server error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("API server shutting down");
                }
            }
        })
    };

    info!("PaySentry Dev Server started successfully");
    info!("Press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Broadcast shutdown to all components
    let _ = shutdown_tx.send(());

    // Stop the simulation loops before the server drains
    engine.stop().await;

    let shutdown_timeout = Duration::from_secs(30);
    let _ = tokio::time::timeout(shutdown_timeout, api_handle).await;

    info!("PaySentry Dev Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
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
