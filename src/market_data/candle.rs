use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLC bar keyed by its open time (Unix epoch milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A bar record as it arrives on the wire.
///
/// Every field is optional so that a record with a missing or non-numeric
/// field still decodes; [`BarRecord::into_candle`] decides whether it is
/// usable. `volume` is accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BarRecord {
    #[serde(default, deserialize_with = "lenient_time")]
    pub time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub close: Option<f64>,
}

impl BarRecord {
    /// Convert into a [`Candle`], rejecting missing or non-finite fields.
    pub fn into_candle(self) -> Result<Candle> {
        let time = self.time.context("missing field time")?;
        let open = finite(self.open, "open")?;
        let high = finite(self.high, "high")?;
        let low = finite(self.low, "low")?;
        let close = finite(self.close, "close")?;

        Ok(Candle {
            time,
            open,
            high,
            low,
            close,
        })
    }
}

fn finite(value: Option<f64>, name: &str) -> Result<f64> {
    let v = value.with_context(|| format!("missing field {name}"))?;
    if !v.is_finite() {
        bail!("field {name} is not finite: {v}");
    }
    Ok(v)
}

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// Upstream feeds send prices either as JSON numbers or as numeric strings.
/// Anything else decodes to `None` instead of failing the whole message.
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_price(&value))
}

fn lenient_time<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_time(&value))
}

pub(crate) fn parse_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Accepts epoch milliseconds (number or numeric string) or an ISO-8601
/// timestamp. Naive timestamps without an offset are taken as UTC.
pub(crate) fn parse_time(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
                .map(|naive| naive.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
