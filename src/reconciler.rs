// =============================================================================
// Stream Reconciler — snapshot/bar events in, render instructions out
// =============================================================================
//
// State machine:
//
//   Uninitialized --snapshot--> Live      replace series, full SMA, FullReplace
//   Live          --snapshot--> Live      same as above (reconnect / resync)
//   Live          --bar-------> Live      mutate-or-append, SMA tail, Update|Append
//   Uninitialized --bar-------> (dropped)
//
// Malformed bars are dropped with a warning and produce no instruction.  The
// reconciler is owned by exactly one task (`run_reconciler`); teardown drops
// it, it never transitions to a terminal state.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::indicators::MovingAverageEngine;
use crate::market_data::{BarRecord, Candle, CandleSeries, UpdateKind};
use crate::types::Selection;

// =============================================================================
// Events and instructions
// =============================================================================

/// An inbound event on the price channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Full, time-ascending history. Replaces everything.
    Snapshot(Vec<BarRecord>),
    /// A single bar: a revision of the forming bar or a new one.
    Bar(BarRecord),
}

/// Moving-average values for indices `start..start + values.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingAverageTail {
    pub start: usize,
    pub values: Vec<Option<f64>>,
}

/// The minimal patch the display layer needs to mirror the series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderInstruction {
    FullReplace {
        time: Vec<i64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        moving_average: Vec<Option<f64>>,
    },
    Update {
        index: usize,
        candle: Candle,
        moving_average: MovingAverageTail,
    },
    Append {
        index: usize,
        candle: Candle,
        moving_average: MovingAverageTail,
    },
}

/// Lifecycle state of a [`StreamReconciler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcilerState {
    Uninitialized,
    Live,
}

// =============================================================================
// StreamReconciler
// =============================================================================

/// Owns the candle series and its moving average for one stream session.
#[derive(Debug)]
pub struct StreamReconciler {
    state: ReconcilerState,
    series: CandleSeries,
    moving_average: MovingAverageEngine,
}

impl StreamReconciler {
    /// Create a reconciler with the given moving-average window.
    ///
    /// Fails when `window` is zero.
    pub fn new(window: usize) -> Result<Self> {
        Ok(Self {
            state: ReconcilerState::Uninitialized,
            series: CandleSeries::new(),
            moving_average: MovingAverageEngine::new(window)?,
        })
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn series(&self) -> &CandleSeries {
        &self.series
    }

    pub fn moving_average(&self) -> &[Option<f64>] {
        self.moving_average.values()
    }

    /// Apply one event. `None` means the event was dropped.
    pub fn handle(&mut self, event: StreamEvent) -> Option<RenderInstruction> {
        match event {
            StreamEvent::Snapshot(records) => Some(self.apply_snapshot(records)),
            StreamEvent::Bar(record) => self.apply_bar(record),
        }
    }

    fn apply_snapshot(&mut self, records: Vec<BarRecord>) -> RenderInstruction {
        let total = records.len();
        let candles: Vec<Candle> = records
            .into_iter()
            .enumerate()
            .filter_map(|(i, rec)| match rec.into_candle() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(position = i, error = %e, "skipping malformed snapshot record");
                    None
                }
            })
            .collect();

        self.series.replace_all(&candles);
        self.moving_average.recompute_full(self.series.closes());
        self.state = ReconcilerState::Live;

        info!(
            received = total,
            kept = candles.len(),
            last_time = ?self.series.last_time(),
            "snapshot applied"
        );
        self.full_replace()
    }

    fn apply_bar(&mut self, record: BarRecord) -> Option<RenderInstruction> {
        if self.state == ReconcilerState::Uninitialized {
            debug!("bar event before first snapshot -- dropped");
            return None;
        }

        let candle = match record.into_candle() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "dropping malformed bar event");
                return None;
            }
        };

        let kind = self.series.apply_event(&candle);
        let index = kind.index();
        let candle = self.series.candle(index)?;
        let start = self
            .moving_average
            .recompute_from(self.series.closes(), index);
        let moving_average = MovingAverageTail {
            start,
            values: self.moving_average.values()[start..].to_vec(),
        };

        debug!(time = candle.time, close = candle.close, ?kind, "bar applied");

        Some(match kind {
            UpdateKind::Mutated(index) => RenderInstruction::Update {
                index,
                candle,
                moving_average,
            },
            UpdateKind::Appended(index) => RenderInstruction::Append {
                index,
                candle,
                moving_average,
            },
        })
    }

    /// A full-replace instruction describing the current state.
    pub fn full_replace(&self) -> RenderInstruction {
        RenderInstruction::FullReplace {
            time: self.series.times().to_vec(),
            open: self.series.opens().to_vec(),
            high: self.series.highs().to_vec(),
            low: self.series.lows().to_vec(),
            close: self.series.closes().to_vec(),
            moving_average: self.moving_average.values().to_vec(),
        }
    }
}

// =============================================================================
// Render sink
// =============================================================================

/// A render instruction stamped with the session it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct RenderFrame {
    pub session: Uuid,
    pub symbol: String,
    pub timeframe: String,
    /// Per-session, strictly increasing.
    pub sequence: u64,
    pub instruction: RenderInstruction,
}

/// Where render frames go. Implementations only read the frame.
pub trait RenderSink: Send {
    fn render(&mut self, frame: Arc<RenderFrame>);
}

impl RenderSink for broadcast::Sender<Arc<RenderFrame>> {
    fn render(&mut self, frame: Arc<RenderFrame>) {
        // No subscribers is fine: nobody is looking at the chart.
        let _ = self.send(frame);
    }
}

#[cfg(test)]
impl RenderSink for mpsc::UnboundedSender<Arc<RenderFrame>> {
    fn render(&mut self, frame: Arc<RenderFrame>) {
        let _ = self.send(frame);
    }
}

/// A display client asking for the full current state.
pub type ResyncRequest = oneshot::Sender<Arc<RenderFrame>>;

// =============================================================================
// Event loop
// =============================================================================

/// Drive `reconciler` from `events` until shutdown or until the channel closes.
///
/// Each event is fully applied and its frame emitted before the next one is
/// taken. Once `shutdown` reads `true` no further event is applied, even if
/// more are already queued.
pub async fn run_reconciler<S: RenderSink>(
    session: Uuid,
    selection: Selection,
    mut reconciler: StreamReconciler,
    mut events: mpsc::Receiver<StreamEvent>,
    mut resync: mpsc::Receiver<ResyncRequest>,
    mut sink: S,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sequence: u64 = 0;
    let mut frame = |instruction: RenderInstruction| {
        sequence += 1;
        Arc::new(RenderFrame {
            session,
            symbol: selection.symbol.clone(),
            timeframe: selection.timeframe.clone(),
            sequence,
            instruction,
        })
    };

    info!(%session, window = reconciler.moving_average.window(), "reconciler started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            ev = events.recv() => {
                let Some(ev) = ev else {
                    info!(%session, "price channel closed");
                    break;
                };
                if *shutdown.borrow() {
                    break;
                }
                if let Some(instruction) = reconciler.handle(ev) {
                    sink.render(frame(instruction));
                }
            }

            Some(reply) = resync.recv() => {
                let _ = reply.send(frame(reconciler.full_replace()));
            }
        }
    }

    info!(%session, bars = reconciler.series().len(), "reconciler stopped");
}

// =============================================================================
// Tests
// =============================================================================
