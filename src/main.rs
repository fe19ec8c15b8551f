// =============================================================================
// Candle Stream — Main Entry Point
// =============================================================================
//
// Starts one stream session for the configured default selection, the signal
// feed, and the display API.  Selection changes arrive through the API and
// replace the session wholesale.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod feed;
mod indicators;
mod market_data;
mod reconciler;
mod runtime_config;
mod session;
mod signals;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candle Stream — starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();
    config.validate().context("invalid runtime configuration")?;

    info!(
        symbols = ?config.symbols,
        timeframes = ?config.timeframes,
        ma_window = config.ma_window,
        "Configuration loaded"
    );

    let bind_addr = config.bind_addr.clone();
    let signal_feed_url = config.signal_feed_url.clone();
    let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);
    let initial = config.initial_selection();

    // ── 2. Build shared state & first session ────────────────────────────
    let state = Arc::new(AppState::new(config));
    state
        .select(initial)
        .context("failed to start the initial stream session")?;

    // ── 3. Signal push feed ──────────────────────────────────────────────
    tokio::spawn(feed::signal::run_signal_feed(
        signal_feed_url,
        state.clone(),
        reconnect_delay,
    ));

    // ── 4. Display API ───────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    state.stop_session();

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Candle Stream shut down complete.");
    Ok(())
}
