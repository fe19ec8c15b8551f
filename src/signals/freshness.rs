// =============================================================================
// Signal Freshness Filter — drop pushes for a selection no longer on screen
// =============================================================================

use crate::types::Selection;

use super::record::SignalRecord;

/// Stateless predicate deciding whether a pushed update is still relevant.
pub struct SignalFreshnessFilter;

impl SignalFreshnessFilter {
    /// True iff the symbols match ignoring ASCII case and the timeframes match
    /// exactly.
    pub fn accept(
        pushed_symbol: &str,
        pushed_timeframe: &str,
        current_symbol: &str,
        current_timeframe: &str,
    ) -> bool {
        pushed_symbol.eq_ignore_ascii_case(current_symbol) && pushed_timeframe == current_timeframe
    }

    /// [`accept`](Self::accept) applied to a signal and the current selection.
    pub fn accepts(record: &SignalRecord, current: &Selection) -> bool {
        Self::accept(
            &record.symbol,
            &record.timeframe,
            &current.symbol,
            &current.timeframe,
        )
    }
}
