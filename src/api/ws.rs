// =============================================================================
// WebSocket Handler — Push-based chart updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate full-replace frame of the active session's series, plus
//      the latest fresh signal if there is one.
//   2. Every render frame the active session emits afterwards, and every
//      accepted signal push.
//
// Frames from a torn-down session are never forwarded.  A client that falls
// behind the broadcast buffer is resynced with a fresh full-replace frame.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::reconciler::RenderFrame;
use crate::session::request_full_state;
use crate::signals::SignalRecord;

// =============================================================================
// Outbound envelope
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum Outbound<'a> {
    Render(&'a RenderFrame),
    Signal(&'a SignalRecord),
}

/// Tracks which session the client is mirroring and the last frame it got.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    session: Option<Uuid>,
    sequence: u64,
}

impl Cursor {
    /// Decide whether `frame` should be forwarded, advancing the cursor if so.
    ///
    /// Frames are forwarded only for the `active` session. Switching to a new
    /// session restarts the sequence; within a session older frames (already
    /// covered by a full-replace) are skipped.
    fn admit(&mut self, frame: &RenderFrame, active: Option<Uuid>) -> bool {
        if active != Some(frame.session) {
            return false;
        }
        if self.session != Some(frame.session) {
            self.session = Some(frame.session);
            self.sequence = 0;
        }
        if frame.sequence <= self.sequence {
            return false;
        }
        self.sequence = frame.sequence;
        true
    }
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before asking for the full state so nothing emitted in
    // between is lost; the cursor drops the overlap.
    let mut frames = state.render_tx.subscribe();
    let mut signals = state.signal_tx.subscribe();
    let mut cursor = Cursor::default();

    if let Err(e) = send_full_state(&mut sender, &state, &mut cursor).await {
        warn!(error = %e, "Failed to send initial WebSocket state");
        return;
    }
    let latest = state.latest_signal.read().clone();
    if let Some(signal) = latest.filter(|s| state.is_signal_fresh(s)) {
        if let Err(e) = send(&mut sender, &Outbound::Signal(&signal)).await {
            debug!(error = %e, "WebSocket send failed — disconnecting");
            return;
        }
    }

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Ok(frame) => {
                        if !cursor.admit(&frame, state.current_session_id()) {
                            continue;
                        }
                        if let Err(e) = send(&mut sender, &Outbound::Render(&frame)).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "WebSocket client lagged — resyncing");
                        if let Err(e) = send_full_state(&mut sender, &state, &mut cursor).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            signal = signals.recv() => {
                match signal {
                    Ok(signal) => {
                        // The selection may have moved on since it was offered.
                        if !state.is_signal_fresh(&signal) {
                            debug!(symbol = %signal.symbol, timeframe = %signal.timeframe, "dropping stale signal push");
                            continue;
                        }
                        if let Err(e) = send(&mut sender, &Outbound::Signal(&signal)).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "WebSocket client skipped signal pushes");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended (None)");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

/// Ask the active session for a full-replace frame and send it.
///
/// With no live session there is nothing to mirror yet; the first frame of
/// the next session is always a full replace, so the client catches up then.
async fn send_full_state<S>(
    sender: &mut S,
    state: &Arc<AppState>,
    cursor: &mut Cursor,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let Some(resync) = state.resync_sender() else {
        return Ok(());
    };
    let Some(frame) = request_full_state(&resync).await else {
        return Ok(());
    };

    *cursor = Cursor {
        session: Some(frame.session),
        sequence: frame.sequence,
    };
    send(sender, &Outbound::Render(&frame)).await
}

async fn send<S>(sender: &mut S, message: &Outbound<'_>) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize outbound message");
            Ok(())
        }
    }
}
