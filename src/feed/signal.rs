use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::signals::SignalRecord;
use crate::types::Selection;

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

/// Decode one upstream signal frame.
///
/// Only `{"event": "signal", "data": {...}}` yields a record; anything else
/// (e.g. the upstream's `welcome` greeting) decodes to `Ok(None)`.
pub fn parse_signal_message(text: &str) -> Result<Option<SignalRecord>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse signal frame JSON")?;

    match root["event"].as_str().context("missing field event")? {
        "signal" => {
            let record = serde_json::from_value(root["data"].clone())
                .context("malformed signal payload")?;
            Ok(Some(record))
        }
        other => {
            debug!(event = %other, "ignoring signal frame");
            Ok(None)
        }
    }
}

/// Connect to the upstream signal WebSocket and offer each pushed record to
/// the shared state, which drops stale ones.
pub async fn run_signal_stream(url: &str, state: &Arc<AppState>) -> Result<()> {
    info!(url = %url, "connecting to signal WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to signal WebSocket")?;

    info!(url = %url, "signal WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                match parse_signal_message(&text) {
                    Ok(Some(record)) => {
                        state.offer_signal(record);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to decode signal frame"),
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "signal WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(url = %url, "signal WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Reconnect loop for the signal push channel. Runs for the process lifetime.
pub async fn run_signal_feed(url: String, state: Arc<AppState>, reconnect_delay: Duration) {
    loop {
        if let Err(e) = run_signal_stream(&url, &state).await {
            error!(url = %url, error = %e, "signal stream error -- reconnecting");
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

// ---------------------------------------------------------------------------
// Point-in-time snapshot
// ---------------------------------------------------------------------------

/// Fetch the current signal for `selection` from the upstream API.
///
/// `425 Too Early` means the upstream has not collected enough bars yet and
/// maps to `Ok(None)`.
pub async fn fetch_signal(
    client: &reqwest::Client,
    base_url: &str,
    selection: &Selection,
) -> Result<Option<SignalRecord>> {
    let url = format!("{}/api/signal", base_url.trim_end_matches('/'));

    let resp = client
        .get(&url)
        .query(&[
            ("symbol", selection.symbol.as_str()),
            ("tf", selection.timeframe.as_str()),
        ])
        .timeout(Duration::from_secs(12))
        .send()
        .await
        .with_context(|| format!("signal request to {url} failed"))?;

    if resp.status() == StatusCode::TOO_EARLY {
        debug!(selection = %selection, "upstream has insufficient data for a signal");
        return Ok(None);
    }

    let record = resp
        .error_for_status()
        .with_context(|| format!("signal request to {url} rejected"))?
        .json::<SignalRecord>()
        .await
        .context("malformed signal snapshot")?;

    Ok(Some(record))
}

/// Fetch the snapshot for `selection` and surface it if it is still fresh
/// when the response arrives.
pub async fn refresh_signal(state: Arc<AppState>, selection: Selection) {
    let base_url = state.runtime_config.read().signal_api_url.clone();
    match fetch_signal(&state.http, &base_url, &selection).await {
        Ok(Some(record)) => {
            state.offer_signal(record);
        }
        Ok(None) => {}
        Err(e) => warn!(selection = %selection, error = %e, "signal snapshot fetch failed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
