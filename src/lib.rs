pub mod api;
pub mod auth;
pub mod config;
pub mod core_state;
pub mod db;
pub mod models;
pub mod ollama_service;
pub mod pipeline;
pub mod storage;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::core_state::CoreState;

/// Start the service and block until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let bind_addr = config.bind_addr;

    // Blocking HTTP clients must be built (and dropped) off the async runtime.
    let core = tokio::task::spawn_blocking(move || CoreState::from_config(config))
        .await?
        .context("Failed to initialize core state")?;
    let core = Arc::new(core);

    let mut server = match api::start_api_server(core.clone(), bind_addr).await {
        Ok(server) => server,
        Err(e) => {
            release(core).await;
            return Err(e).with_context(|| format!("Failed to bind {bind_addr}"));
        }
    };

    tracing::info!(
        addr = %server.local_addr,
        started_at = %server.started_at,
        "Listening, press Ctrl-C to stop"
    );

    let signal = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");

    server.shutdown();
    server.wait().await;
    release(core).await;

    signal.context("Failed to listen for Ctrl-C")?;
    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}

/// Drop the core on a blocking thread; it owns blocking HTTP clients.
async fn release(core: Arc<CoreState>) {
    if let Err(e) = tokio::task::spawn_blocking(move || drop(core)).await {
        tracing::error!("Failed to release core state: {e}");
    }
}
