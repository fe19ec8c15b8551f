// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`.  The display layer reads the catalogue
// and the current selection, switches selection, and opens the WebSocket feed.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;
use crate::types::Selection;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/timeframes", get(timeframes))
        .route("/api/v1/selection", get(get_selection).post(set_selection))
        .route("/api/v1/signal", get(latest_signal))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    session_running: bool,
    server_time: String,
    uptime_secs: u64,
    symbols: Vec<String>,
    timeframes: Vec<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.runtime_config.read().clone();
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        session_running: state.session_running(),
        server_time: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        symbols: config.symbols,
        timeframes: config.timeframes,
    })
}

// =============================================================================
// Timeframes
// =============================================================================

async fn timeframes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timeframes = state.runtime_config.read().timeframes.clone();
    Json(serde_json::json!({ "timeframes": timeframes }))
}

// =============================================================================
// Selection
// =============================================================================

#[derive(Serialize)]
struct SelectionResponse {
    symbol: String,
    timeframe: String,
    session: Option<Uuid>,
}

async fn get_selection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let selection = state.current_selection();
    Json(SelectionResponse {
        symbol: selection.symbol,
        timeframe: selection.timeframe,
        session: state.current_session_id(),
    })
}

#[derive(Deserialize)]
struct SelectionRequest {
    symbol: String,
    timeframe: String,
}

fn bad_request(message: String) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

/// Validate a selection request against the configured catalogue.
fn validate_selection(
    req: &SelectionRequest,
    config: &RuntimeConfig,
) -> Result<Selection, (StatusCode, Json<serde_json::Value>)> {
    let symbol = req.symbol.trim();
    let well_formed = symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if symbol.is_empty() || !well_formed {
        return Err(bad_request(format!("Invalid symbol: '{}'", req.symbol)));
    }
    if !config.supports_timeframe(&req.timeframe) {
        return Err(bad_request(format!(
            "Unsupported timeframe: '{}'. Use one of {:?}.",
            req.timeframe, config.timeframes
        )));
    }
    Ok(Selection::new(symbol, req.timeframe.clone()))
}

async fn set_selection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectionRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let config = state.runtime_config.read().clone();
    let selection = validate_selection(&req, &config)?;

    let session = state.select(selection.clone()).map_err(|e| {
        warn!(error = %e, selection = %selection, "failed to start session");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{e:#}") })),
        )
    })?;
    info!(selection = %selection, "Selection changed via API");

    Ok(Json(SelectionResponse {
        symbol: selection.symbol,
        timeframe: selection.timeframe,
        session: Some(session),
    }))
}

// =============================================================================
// Signal
// =============================================================================

async fn latest_signal(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let latest = state.latest_signal.read().clone();
    match latest {
        Some(signal) => Json(signal).into_response(),
        None => {
            let body = serde_json::json!({
                "signal": null,
                "message": "No signal for the current selection yet",
            });
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> RuntimeConfig {
        RuntimeConfig {
            timeframes: vec!["5min".into(), "1min".into()],
            ..RuntimeConfig::default()
        }
    }

    fn req(symbol: &str, timeframe: &str) -> SelectionRequest {
        SelectionRequest {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }

    #[test]
    fn valid_selection_is_normalised() {
        let sel = validate_selection(&req(" brk.b ", "5min"), &catalogue()).unwrap();
        assert_eq!(sel, Selection::new("BRK.B", "5min"));
    }

    #[test]
    fn unknown_timeframe_is_rejected() {
        let (status, _) = validate_selection(&req("AAPL", "7min"), &catalogue()).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn bad_symbol_is_rejected() {
        assert!(validate_selection(&req("", "1min"), &catalogue()).is_err());
        assert!(validate_selection(&req("AA PL", "1min"), &catalogue()).is_err());
    }
}
