use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::market_data::BarRecord;
use crate::reconciler::StreamEvent;

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

/// Decode one upstream price frame.
///
/// Expected shapes:
/// ```json
/// { "event": "init_candles", "data": [ { "time": ..., "open": ..., ... }, ... ] }
/// { "event": "new_candle",   "data": { "time": ..., "open": ..., ... } }
/// ```
///
/// Other event names decode to `Ok(None)`. Snapshot entries that are not
/// objects are kept as empty records so the reconciler can report and skip
/// them individually.
pub fn parse_price_message(text: &str) -> Result<Option<StreamEvent>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse price frame JSON")?;

    let event = root["event"].as_str().context("missing field event")?;
    let data = &root["data"];

    match event {
        "init_candles" => {
            let rows = data.as_array().context("init_candles data is not an array")?;
            let records = rows
                .iter()
                .map(|row| serde_json::from_value::<BarRecord>(row.clone()).unwrap_or_default())
                .collect();
            Ok(Some(StreamEvent::Snapshot(records)))
        }
        "new_candle" => {
            let record = serde_json::from_value::<BarRecord>(data.clone())
                .context("new_candle data is not an object")?;
            Ok(Some(StreamEvent::Bar(record)))
        }
        other => {
            debug!(event = %other, "ignoring price frame");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Price WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the upstream price WebSocket and forward decoded events into
/// `events`.
///
/// Returns `Ok(())` when the stream ends or the session stops listening, so
/// the caller can decide whether to reconnect. The upstream sends a fresh
/// `init_candles` on every connect, which resyncs the reconciler.
pub async fn run_price_stream(url: &str, events: &mpsc::Sender<StreamEvent>) -> Result<()> {
    info!(url = %url, "connecting to price WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to price WebSocket")?;

    info!(url = %url, "price WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_price_message(&text) {
                        Ok(Some(event)) => {
                            if events.send(event).await.is_err() {
                                debug!("price channel closed -- session torn down");
                                return Ok(());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "failed to decode price frame");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "price WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(url = %url, "price WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Keep the price stream alive for as long as the session listens.
pub async fn run_price_feed(url: String, events: mpsc::Sender<StreamEvent>, reconnect_delay: Duration) {
    while !events.is_closed() {
        if let Err(e) = run_price_stream(&url, &events).await {
            error!(url = %url, error = %e, "price stream error -- reconnecting");
        }
        if events.is_closed() {
            break;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
    debug!(url = %url, "price feed stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_frame() {
        let json = r#"{
            "event": "init_candles",
            "data": [
                {"time": "2024-01-01T00:00:00", "open": 10, "high": 11, "low": 9, "close": 10, "volume": 0},
                {"time": "2024-01-01T00:01:00", "open": 10, "high": 12, "low": 10, "close": 11, "volume": 5}
            ]
        }"#;
        match parse_price_message(json).unwrap() {
            Some(StreamEvent::Snapshot(records)) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[1].close, Some(11.0));
                assert_eq!(records[1].time, Some(1_704_067_260_000));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn parses_bar_frame() {
        let json = r#"{"event": "new_candle", "data": {"time": 60000, "open": "1", "high": "2", "low": "0.5", "close": "1.5"}}"#;
        match parse_price_message(json).unwrap() {
            Some(StreamEvent::Bar(rec)) => {
                let candle = rec.into_candle().unwrap();
                assert_eq!(candle.time, 60_000);
                assert!((candle.low - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("expected bar, got {other:?}"),
        }
    }

    #[test]
    fn non_object_snapshot_entries_become_empty_records() {
        let json = r#"{"event": "init_candles", "data": [42, {"time": 1, "open": 1, "high": 1, "low": 1, "close": 1}]}"#;
        match parse_price_message(json).unwrap() {
            Some(StreamEvent::Snapshot(records)) => {
                assert_eq!(records[0], BarRecord::default());
                assert!(records[1].clone().into_candle().is_ok());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn empty_snapshot_is_valid() {
        let json = r#"{"event": "init_candles", "data": []}"#;
        assert_eq!(
            parse_price_message(json).unwrap(),
            Some(StreamEvent::Snapshot(vec![]))
        );
    }

    #[test]
    fn unknown_event_is_ignored() {
        let json = r#"{"event": "welcome", "data": {"msg": "hi"}}"#;
        assert_eq!(parse_price_message(json).unwrap(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_price_message("not json").is_err());
        assert!(parse_price_message(r#"{"data": []}"#).is_err());
        assert!(parse_price_message(r#"{"event": "new_candle", "data": 7}"#).is_err());
    }
}
