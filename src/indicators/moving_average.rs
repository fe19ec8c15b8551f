// =============================================================================
// Trailing Simple Moving Average (SMA) — streaming engine
// =============================================================================
//
// Output is index-aligned with the close series it was computed from:
//
//   sma[i] = (close[i-W+1] + ... + close[i]) / W     for i >= W-1
//   sma[i] = None                                    for i <  W-1
//
// Both the full and the tail recomputation walk the same running sum: add the
// close entering the window, subtract the close leaving it.  The sum after
// every step is kept, so a tail recomputation from index m resumes from the
// sum at m-1 and performs exactly the float operations a full pass would.
// A mutation at index m cannot change anything before m.
// =============================================================================

use anyhow::{bail, Result};

/// Default look-back window.
pub const DEFAULT_WINDOW: usize = 10;

/// Maintains a trailing SMA series aligned with a close-price series.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverageEngine {
    window: usize,
    values: Vec<Option<f64>>,
    /// Running window sum after each index, aligned with `values`.
    sums: Vec<f64>,
}

impl MovingAverageEngine {
    /// Create an engine with a fixed window.
    ///
    /// A zero window is a configuration error.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            bail!("moving average window must be positive");
        }
        Ok(Self {
            window,
            values: Vec::new(),
            sums: Vec::new(),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// The current SMA series.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Recompute every index from scratch in O(n).
    pub fn recompute_full(&mut self, closes: &[f64]) -> &[Option<f64>] {
        self.values.clear();
        self.sums.clear();
        self.extend_from(closes, 0);
        &self.values
    }

    /// Recompute only indices `>= from_index`, reusing everything before.
    ///
    /// Returns the first index whose value may have changed. When the cached
    /// series does not reach `from_index` the whole series is rebuilt and 0
    /// is returned.
    pub fn recompute_from(&mut self, closes: &[f64], from_index: usize) -> usize {
        if from_index > self.values.len() || from_index > closes.len() {
            self.recompute_full(closes);
            return 0;
        }

        self.values.truncate(from_index);
        self.sums.truncate(from_index);
        self.extend_from(closes, from_index);
        from_index
    }

    /// Push SMA values for `closes[start..]` onto `self.values`.
    ///
    /// `self.sums` must hold exactly `start` entries; the walk resumes from
    /// the last of them.
    fn extend_from(&mut self, closes: &[f64], start: usize) {
        let w = self.window;
        let divisor = w as f64;

        let mut sum = start.checked_sub(1).map_or(0.0, |prev| self.sums[prev]);

        let extra = closes.len().saturating_sub(start);
        self.values.reserve(extra);
        self.sums.reserve(extra);
        for i in start..closes.len() {
            sum += closes[i];
            if i >= w {
                sum -= closes[i - w];
            }
            self.sums.push(sum);
            self.values
                .push(if i + 1 >= w { Some(sum / divisor) } else { None });
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Reference SMA by direct summation of each window.
    fn naive_sma(closes: &[f64], w: usize) -> Vec<Option<f64>> {
        (0..closes.len())
            .map(|i| {
                if i + 1 < w {
                    None
                } else {
                    Some(closes[i + 1 - w..=i].iter().sum::<f64>() / w as f64)
                }
            })
            .collect()
    }

    fn assert_close(a: &[Option<f64>], b: &[Option<f64>]) {
        assert_eq!(a.len(), b.len(), "length mismatch: {a:?} vs {b:?}");
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            match (x, y) {
                (None, None) => {}
                (Some(x), Some(y)) => {
                    assert!((x - y).abs() < 1e-9, "index {i}: got {x}, expected {y}")
                }
                _ => panic!("index {i}: got {x:?}, expected {y:?}"),
            }
        }
    }

    // ---- construction ----------------------------------------------------

    #[test]
    fn zero_window_is_rejected() {
        assert!(MovingAverageEngine::new(0).is_err());
    }

    #[test]
    fn default_window_is_ten() {
        assert_eq!(DEFAULT_WINDOW, 10);
    }

    // ---- recompute_full --------------------------------------------------

    #[test]
    fn empty_input_gives_empty_output() {
        let mut eng = MovingAverageEngine::new(3).unwrap();
        assert!(eng.recompute_full(&[]).is_empty());
    }

    #[test]
    fn shorter_than_window_is_all_undefined() {
        let mut eng = MovingAverageEngine::new(5).unwrap();
        assert_eq!(eng.recompute_full(&[1.0, 2.0, 3.0]), &[None::<f64>; 3]);
    }

    #[test]
    fn window_of_one_is_identity() {
        let closes = [3.0, 1.5, 7.25];
        let mut eng = MovingAverageEngine::new(1).unwrap();
        assert_eq!(eng.recompute_full(&closes), &[Some(3.0), Some(1.5), Some(7.25)]);
    }

    #[test]
    fn known_values_window_two() {
        let mut eng = MovingAverageEngine::new(2).unwrap();
        assert_eq!(eng.recompute_full(&[10.0, 11.0]), &[None, Some(10.5)]);
    }

    #[test]
    fn matches_direct_summation() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + ((i * 37) % 23) as f64 * 0.25 - (i % 7) as f64)
            .collect();
        for w in [1, 2, 3, 10, 50, 199, 200, 250] {
            let mut eng = MovingAverageEngine::new(w).unwrap();
            let full = eng.recompute_full(&closes).to_vec();
            assert_close(&full, &naive_sma(&closes, w));
        }
    }

    // ---- recompute_from --------------------------------------------------

    #[test]
    fn mutation_leaves_earlier_values_untouched() {
        let mut closes: Vec<f64> = (1..=20).map(f64::from).collect();
        let mut eng = MovingAverageEngine::new(4).unwrap();
        let before = eng.recompute_full(&closes).to_vec();

        closes[15] = 1000.0;
        let start = eng.recompute_from(&closes, 15);
        assert_eq!(start, 15);
        assert_eq!(&eng.values()[..15], &before[..15]);
        assert_close(eng.values(), &naive_sma(&closes, 4));
    }

    #[test]
    fn append_extends_by_one() {
        let mut closes = vec![1.0, 2.0, 3.0];
        let mut eng = MovingAverageEngine::new(2).unwrap();
        eng.recompute_full(&closes);

        closes.push(5.0);
        assert_eq!(eng.recompute_from(&closes, 3), 3);
        assert_eq!(eng.values(), &[None, Some(1.5), Some(2.5), Some(4.0)]);
    }

    #[test]
    fn stale_cache_falls_back_to_full() {
        let closes = vec![2.0, 4.0, 6.0, 8.0];
        let mut eng = MovingAverageEngine::new(2).unwrap();
        assert_eq!(eng.recompute_from(&closes, 3), 0);
        assert_eq!(eng.values(), &[None, Some(3.0), Some(5.0), Some(7.0)]);
    }

    #[test]
    fn incremental_matches_full_over_event_stream() {
        // (time, close) pairs; repeated time = mutation of the forming bar.
        let events = [
            (1, 10.0),
            (1, 10.5),
            (2, 11.0),
            (3, 9.0),
            (3, 9.5),
            (3, 12.0),
            (4, 13.0),
            (5, 8.0),
            (5, 8.25),
            (6, 14.0),
        ];
        let w = 3;

        let mut times: Vec<i64> = Vec::new();
        let mut closes: Vec<f64> = Vec::new();
        let mut eng = MovingAverageEngine::new(w).unwrap();

        for (t, c) in events {
            let idx = if times.last() == Some(&t) {
                let last = closes.len() - 1;
                closes[last] = c;
                last
            } else {
                times.push(t);
                closes.push(c);
                closes.len() - 1
            };
            eng.recompute_from(&closes, idx);
            assert_eq!(eng.values().len(), closes.len());
        }

        let mut full = MovingAverageEngine::new(w).unwrap();
        assert_eq!(eng.values(), full.recompute_full(&closes));
    }

    #[test]
    fn incremental_is_bit_identical_to_full_for_decimal_prices() {
        let w = 10;
        let mut times: Vec<i64> = Vec::new();
        let mut closes: Vec<f64> = Vec::new();
        for i in 0..50 {
            times.push(i);
            closes.push(170.13 + 0.37 * i as f64);
        }

        let mut eng = MovingAverageEngine::new(w).unwrap();
        eng.recompute_full(&closes);

        let mut next_time = 50;
        for step in 0..500u32 {
            let close = 150.0 + ((step * 7919) % 4001) as f64 * 0.0137;
            let idx = if step % 3 == 0 {
                times.push(next_time);
                next_time += 1;
                closes.push(close);
                closes.len() - 1
            } else {
                let last = closes.len() - 1;
                closes[last] = close;
                last
            };
            eng.recompute_from(&closes, idx);
        }

        let mut full = MovingAverageEngine::new(w).unwrap();
        assert_eq!(eng.values(), full.recompute_full(&closes));
    }
}
