// =============================================================================
// Shared types used across the candle stream service
// =============================================================================

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// The `(symbol, timeframe)` pair the display is currently showing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub symbol: String,
    pub timeframe: String,
}

impl Selection {
    /// Build a selection, upper-casing the symbol.
    pub fn new(symbol: impl AsRef<str>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.as_ref().trim().to_uppercase(),
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Length of a timeframe label in minutes.
///
/// Accepts `<n>min` and `<n>hour` with a positive `n`.
pub fn timeframe_minutes(tf: &str) -> Result<u32> {
    let (digits, factor) = if let Some(n) = tf.strip_suffix("min") {
        (n, 1)
    } else if let Some(n) = tf.strip_suffix("hour") {
        (n, 60)
    } else {
        bail!("unsupported timeframe: {tf}");
    };

    let n: u32 = digits
        .parse()
        .with_context(|| format!("unsupported timeframe: {tf}"))?;
    if n == 0 {
        bail!("unsupported timeframe: {tf}");
    }
    n.checked_mul(factor)
        .with_context(|| format!("timeframe too long: {tf}"))
}
