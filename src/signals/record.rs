// =============================================================================
// Signal Record — wire shape of a point-in-time trading signal
// =============================================================================
//
// Signals are computed upstream; this service only relays them.  The same
// shape arrives from the snapshot endpoint and on the push channel (the
// snapshot endpoint names the timestamp `time`, the push channel `timestamp`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction classification attached to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
    #[serde(other)]
    Unknown,
}

/// Confidence-bucketed recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strength {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    #[serde(rename = "Strong Sell")]
    StrongSell,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "Strong Buy"),
            Self::Buy => write!(f, "Buy"),
            Self::Neutral => write!(f, "Neutral"),
            Self::Sell => write!(f, "Sell"),
            Self::StrongSell => write!(f, "Strong Sell"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A trading signal for one `(symbol, timeframe)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub timeframe: String,
    pub trend: Trend,
    pub strength: Strength,
    /// Weighted score in `[0, 1]`.
    pub confidence: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub last_close: f64,
    /// Free-form breakdown of the indicator inputs.
    #[serde(default)]
    pub explain: serde_json::Value,
    #[serde(default, alias = "time")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUSHED: &str = r#"{
        "symbol": "AAPL",
        "timeframe": "1min",
        "timestamp": "2024-05-01T14:30:00+00:00",
        "trend": "Bullish",
        "strength": "Strong Buy",
        "entry": 170.25,
        "stop_loss": 169.0,
        "take_profit": 172.75,
        "confidence": 0.85,
        "explain": {"trend_up": true, "rsi": 61.2},
        "last_close": 170.25
    }"#;

    #[test]
    fn decodes_pushed_signal() {
        let rec: SignalRecord = serde_json::from_str(PUSHED).unwrap();
        assert_eq!(rec.symbol, "AAPL");
        assert_eq!(rec.trend, Trend::Bullish);
        assert_eq!(rec.strength, Strength::StrongBuy);
        assert!((rec.confidence - 0.85).abs() < f64::EPSILON);
        assert_eq!(rec.explain["trend_up"], serde_json::Value::Bool(true));
        assert!(rec.timestamp.is_some());
    }

    #[test]
    fn snapshot_time_field_is_accepted() {
        let json = PUSHED.replace("\"timestamp\"", "\"time\"");
        let rec: SignalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(
            rec.timestamp.map(|t| t.timestamp()),
            Some(1_714_573_800)
        );
    }

    #[test]
    fn unknown_labels_do_not_fail_decoding() {
        let json = PUSHED
            .replace("\"Bullish\"", "\"Choppy\"")
            .replace("\"Strong Buy\"", "\"Hold\"");
        let rec: SignalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec.trend, Trend::Unknown);
        assert_eq!(rec.strength, Strength::Unknown);
        assert_eq!(rec.strength.to_string(), "Unknown");
    }
}
