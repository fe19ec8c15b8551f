use serde::Serialize;

use super::candle::Candle;

// ---------------------------------------------------------------------------
// UpdateKind
// ---------------------------------------------------------------------------

/// Outcome of applying a single bar event to a [`CandleSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum UpdateKind {
    /// The in-progress bar at this index received a new tick.
    Mutated(usize),
    /// A new bar period began at this index.
    Appended(usize),
}

impl UpdateKind {
    pub fn index(self) -> usize {
        match self {
            Self::Mutated(i) | Self::Appended(i) => i,
        }
    }
}

// ---------------------------------------------------------------------------
// CandleSeries -- column-oriented OHLC storage
// ---------------------------------------------------------------------------

/// Ordered OHLC bars stored as five parallel columns.
///
/// All columns always have the same length; index `i` in every column refers
/// to the same bar. Only the last bar can be mutated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    time: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all stored bars and store `candles` verbatim.
    ///
    /// The input is assumed to be time-ordered already; it is not re-sorted.
    pub fn replace_all(&mut self, candles: &[Candle]) {
        self.time.clear();
        self.open.clear();
        self.high.clear();
        self.low.clear();
        self.close.clear();

        self.time.reserve(candles.len());
        self.open.reserve(candles.len());
        self.high.reserve(candles.len());
        self.low.reserve(candles.len());
        self.close.reserve(candles.len());

        for c in candles {
            self.push(c);
        }
    }

    /// Apply one bar event.
    ///
    /// * Same `time` as the last bar: the last bar's OHLC values are
    ///   overwritten and [`UpdateKind::Mutated`] is returned.
    /// * Anything else is appended, including out-of-order timestamps, and
    ///   [`UpdateKind::Appended`] is returned.
    pub fn apply_event(&mut self, c: &Candle) -> UpdateKind {
        if let Some(last) = self.last_index() {
            if self.time[last] == c.time {
                self.open[last] = c.open;
                self.high[last] = c.high;
                self.low[last] = c.low;
                self.close[last] = c.close;
                return UpdateKind::Mutated(last);
            }
        }

        self.push(c);
        UpdateKind::Appended(self.time.len() - 1)
    }

    fn push(&mut self, c: &Candle) {
        self.time.push(c.time);
        self.open.push(c.open);
        self.high.push(c.high);
        self.low.push(c.low);
        self.close.push(c.close);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    fn last_index(&self) -> Option<usize> {
        self.time.len().checked_sub(1)
    }

    pub fn last_time(&self) -> Option<i64> {
        self.time.last().copied()
    }

    /// The bar at `index`, reassembled from the columns.
    pub fn candle(&self, index: usize) -> Option<Candle> {
        Some(Candle {
            time: *self.time.get(index)?,
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
        })
    }

    pub fn times(&self) -> &[i64] {
        &self.time
    }

    pub fn opens(&self) -> &[f64] {
        &self.open
    }

    pub fn highs(&self) -> &[f64] {
        &self.high
    }

    pub fn lows(&self) -> &[f64] {
        &self.low
    }

    /// Close prices, oldest first. Read by the moving-average engine.
    pub fn closes(&self) -> &[f64] {
        &self.close
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
