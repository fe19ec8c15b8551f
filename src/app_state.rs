// =============================================================================
// Central Application State — candle stream service
// =============================================================================
//
// Owns the process-wide pieces: configuration, the current selection, the
// active stream session, the latest fresh signal, and the broadcast channels
// the display WebSocket subscribes to.  The candle series itself is NOT here;
// it lives inside the session's reconciler task.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock / Mutex for mutable shared fields.  No guard is ever
//     held across an await point.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::feed::signal::refresh_signal;
use crate::reconciler::{RenderFrame, ResyncRequest};
use crate::runtime_config::RuntimeConfig;
use crate::session::SessionHandle;
use crate::signals::{SignalFreshnessFilter, SignalRecord};
use crate::types::Selection;

/// Capacity of the signal broadcast channel.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every selection change and accepted signal.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Selection & session ─────────────────────────────────────────────
    pub selection: RwLock<Selection>,
    session: Mutex<Option<SessionHandle>>,

    // ── Outbound channels ───────────────────────────────────────────────
    pub render_tx: broadcast::Sender<Arc<RenderFrame>>,
    pub signal_tx: broadcast::Sender<Arc<SignalRecord>>,

    // ── Signals ─────────────────────────────────────────────────────────
    pub latest_signal: RwLock<Option<SignalRecord>>,
    pub http: reqwest::Client,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState`. No session is running until
    /// [`AppState::select`] is called.
    pub fn new(config: RuntimeConfig) -> Self {
        let selection = config.initial_selection();
        let (render_tx, _) = broadcast::channel(config.render_channel_capacity);
        let (signal_tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            selection: RwLock::new(selection),
            session: Mutex::new(None),
            render_tx,
            signal_tx,
            latest_signal: RwLock::new(None),
            http: reqwest::Client::new(),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Selection & Session ─────────────────────────────────────────────

    pub fn current_selection(&self) -> Selection {
        self.selection.read().clone()
    }

    /// Id of the running session, if any.
    pub fn current_session_id(&self) -> Option<Uuid> {
        self.session.lock().as_ref().map(|s| s.id)
    }

    /// Whether a session exists and its reconciler task is still processing.
    pub fn session_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_shut_down() && !s.is_finished())
    }

    /// Resync channel of the running session, if any.
    pub fn resync_sender(&self) -> Option<mpsc::Sender<ResyncRequest>> {
        self.session.lock().as_ref().map(SessionHandle::resync_sender)
    }

    /// Tear down the running session and start a fresh one for `selection`.
    ///
    /// The old session is shut down before the new one is created, so no
    /// frame from it can follow the new session's first frame.
    pub fn select(self: &Arc<Self>, selection: Selection) -> Result<Uuid> {
        let config = self.runtime_config.read().clone();

        let id = {
            let mut slot = self.session.lock();
            if let Some(old) = slot.take() {
                old.shutdown();
            }
            let handle = SessionHandle::spawn(selection.clone(), &config, self.render_tx.clone())?;
            *self.selection.write() = selection.clone();
            let id = handle.id;
            *slot = Some(handle);
            id
        };

        {
            let mut latest = self.latest_signal.write();
            if latest
                .as_ref()
                .is_some_and(|s| !SignalFreshnessFilter::accepts(s, &selection))
            {
                *latest = None;
            }
        }

        self.increment_version();
        info!(session = %id, selection = %selection, "selection active");

        tokio::spawn(refresh_signal(self.clone(), selection));
        Ok(id)
    }

    /// Tear down the running session, if any.
    pub fn stop_session(&self) {
        if let Some(old) = self.session.lock().take() {
            old.shutdown();
        }
    }

    // ── Signals ─────────────────────────────────────────────────────────

    /// Whether `record` still belongs to the current selection.
    pub fn is_signal_fresh(&self, record: &SignalRecord) -> bool {
        SignalFreshnessFilter::accepts(record, &self.selection.read())
    }

    /// Surface `record` if it matches the current selection.
    ///
    /// Returns whether it was accepted.
    pub fn offer_signal(&self, record: SignalRecord) -> bool {
        let current = self.current_selection();
        if !SignalFreshnessFilter::accepts(&record, &current) {
            debug!(
                pushed_symbol = %record.symbol,
                pushed_timeframe = %record.timeframe,
                current = %current,
                "discarding stale signal"
            );
            return false;
        }

        info!(
            selection = %current,
            trend = ?record.trend,
            strength = %record.strength,
            confidence = record.confidence,
            "signal accepted"
        );
        *self.latest_signal.write() = Some(record.clone());
        let _ = self.signal_tx.send(Arc::new(record));
        self.increment_version();
        true
    }
}
