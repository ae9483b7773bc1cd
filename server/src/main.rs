use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tts_core::{SessionConfig, SynthesisEngine};

use server::{build_router, config::ServerConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech synthesis bridge...");

    let config = ServerConfig::from_env();
    let session_config = SessionConfig::from_env();
    info!("Session configuration: {:?}", session_config);

    let engine = SynthesisEngine::with_http(session_config)
        .context("Refusing to start with an invalid synthesis configuration")?;
    info!(
        "Server configuration loaded: port={}, request_timeout={}s, frame={} bytes",
        config.port,
        config.request_timeout_secs,
        engine.frame_bytes()
    );

    let state = AppState::new(engine, config.clone());
    let engine = state.engine.clone();
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.close(),
        Err(_) => warn!("Synthesis engine still in use at shutdown"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
