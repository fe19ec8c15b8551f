// =============================================================================
// Stream Session — one reconciler + one price feed per selection
// =============================================================================
//
// A session is created for a selection and torn down when the selection
// changes or the process exits.  It is never re-pointed at another selection.
// Teardown flips a watch flag the reconciler checks before every event, then
// aborts the feed task; both steps are idempotent.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::feed::price::run_price_feed;
use crate::reconciler::{run_reconciler, RenderFrame, RenderSink, ResyncRequest, StreamEvent, StreamReconciler};
use crate::runtime_config::RuntimeConfig;
use crate::types::Selection;

/// Handle to a running session. Dropping it tears the session down.
pub struct SessionHandle {
    pub id: Uuid,
    pub selection: Selection,
    shutdown: watch::Sender<bool>,
    resync: mpsc::Sender<ResyncRequest>,
    reconciler: JoinHandle<()>,
    feed: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start the reconciler task only. Events are fed through the returned
    /// sender.
    ///
    /// Fails when `window` is zero.
    pub fn start<S>(
        selection: Selection,
        window: usize,
        event_capacity: usize,
        sink: S,
    ) -> Result<(Self, mpsc::Sender<StreamEvent>)>
    where
        S: RenderSink + 'static,
    {
        let reconciler = StreamReconciler::new(window)?;
        let id = Uuid::new_v4();

        let (events_tx, events_rx) = mpsc::channel(event_capacity);
        let (resync_tx, resync_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_reconciler(
            id,
            selection.clone(),
            reconciler,
            events_rx,
            resync_rx,
            sink,
            shutdown_rx,
        ));

        info!(session = %id, selection = %selection, window, "session started");

        Ok((
            Self {
                id,
                selection,
                shutdown: shutdown_tx,
                resync: resync_tx,
                reconciler: task,
                feed: None,
            },
            events_tx,
        ))
    }

    /// Start the reconciler and the upstream price feed for `selection`.
    pub fn spawn<S>(selection: Selection, config: &RuntimeConfig, sink: S) -> Result<Self>
    where
        S: RenderSink + 'static,
    {
        let (mut handle, events) =
            Self::start(selection, config.ma_window, config.event_channel_capacity, sink)?;

        let url = config.price_feed_url_for(&handle.selection);
        let delay = Duration::from_secs(config.reconnect_delay_secs);
        handle.feed = Some(tokio::spawn(run_price_feed(url, events, delay)));
        Ok(handle)
    }

    /// Stop processing events. Safe to call any number of times.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        if let Some(feed) = &self.feed {
            feed.abort();
        }
        info!(session = %self.id, selection = %self.selection, "session torn down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Whether the reconciler task has exited.
    pub fn is_finished(&self) -> bool {
        self.reconciler.is_finished()
    }

    pub fn resync_sender(&self) -> mpsc::Sender<ResyncRequest> {
        self.resync.clone()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Ask a session's reconciler for a full-replace frame of its current state.
///
/// `None` when the session has already been torn down.
pub async fn request_full_state(resync: &mpsc::Sender<ResyncRequest>) -> Option<Arc<RenderFrame>> {
    let (tx, rx) = oneshot::channel();
    resync.send(tx).await.ok()?;
    rx.await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::BarRecord;
    use crate::reconciler::RenderInstruction;

    fn flat(time: i64, close: f64) -> BarRecord {
        BarRecord {
            time: Some(time),
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close: Some(close),
        }
    }

    #[tokio::test]
    async fn zero_window_fails_to_start() {
        let (tx, _rx) = mpsc::unbounded_channel::<Arc<RenderFrame>>();
        assert!(SessionHandle::start(Selection::new("AAPL", "1min"), 0, 8, tx).is_err());
    }

    #[tokio::test]
    async fn frames_carry_session_and_selection() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, events) =
            SessionHandle::start(Selection::new("msft", "5min"), 2, 8, tx).unwrap();

        events
            .send(StreamEvent::Snapshot(vec![flat(1, 1.0)]))
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.session, handle.id);
        assert_eq!(frame.symbol, "MSFT");
        assert_eq!(frame.timeframe, "5min");
    }

    #[tokio::test]
    async fn full_state_reflects_applied_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, events) =
            SessionHandle::start(Selection::new("AAPL", "1min"), 2, 8, tx).unwrap();

        events
            .send(StreamEvent::Snapshot(vec![flat(1, 1.0), flat(2, 3.0)]))
            .await
            .unwrap();
        events.send(StreamEvent::Bar(flat(3, 5.0))).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let frame = request_full_state(&handle.resync_sender()).await.unwrap();
        match &frame.instruction {
            RenderInstruction::FullReplace { close, moving_average, .. } => {
                assert_eq!(close, &vec![1.0, 3.0, 5.0]);
                assert_eq!(moving_average, &vec![None, Some(2.0), Some(4.0)]);
            }
            other => panic!("expected FullReplace, got {other:?}"),
        }
        assert_eq!(frame.sequence, 3);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_processing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, events) =
            SessionHandle::start(Selection::new("AAPL", "1min"), 2, 8, tx).unwrap();

        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shut_down());

        // The reconciler may already be gone; either way nothing is rendered.
        let _ = events.send(StreamEvent::Snapshot(vec![flat(1, 1.0)])).await;
        assert!(rx.recv().await.is_none());
        assert!(request_full_state(&handle.resync_sender()).await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_handle_tears_down() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, _events) =
            SessionHandle::start(Selection::new("AAPL", "1min"), 2, 8, tx).unwrap();
        drop(handle);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closing_the_event_channel_ends_the_reconciler() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (handle, events) =
            SessionHandle::start(Selection::new("AAPL", "1min"), 2, 8, tx).unwrap();
        drop(events);
        for _ in 0..100 {
            if handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_finished());
        assert!(!handle.is_shut_down());
    }
}
