// =============================================================================
// Trading Signals — records pushed or fetched for the current selection
// =============================================================================

pub mod freshness;
pub mod record;

pub use freshness::SignalFreshnessFilter;
pub use record::{SignalRecord, Strength, Trend};
