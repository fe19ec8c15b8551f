// =============================================================================
// Runtime Configuration — JSON settings with atomic save
// =============================================================================
//
// Every tunable of the candle stream service lives here.  All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file.  Persistence uses an atomic tmp + rename pattern.
//
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::indicators::moving_average::DEFAULT_WINDOW;
use crate::types::{timeframe_minutes, Selection};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["AAPL".to_string()]
}

fn default_timeframes() -> Vec<String> {
    ["4hour", "2hour", "1hour", "30min", "15min", "5min", "3min", "1min"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeframe() -> String {
    "1min".to_string()
}

fn default_ma_window() -> usize {
    DEFAULT_WINDOW
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_price_feed_url() -> String {
    "ws://127.0.0.1:5000/prices?symbol={symbol}&tf={timeframe}".to_string()
}

fn default_signal_feed_url() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}

fn default_signal_api_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_render_channel_capacity() -> usize {
    256
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Selection ---------------------------------------------------------

    /// Symbols offered to the display. The first one is selected at startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Timeframe labels offered to the display (`<n>min` / `<n>hour`).
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    /// Timeframe selected at startup.
    #[serde(default = "default_timeframe")]
    pub default_timeframe: String,

    // --- Derived series ----------------------------------------------------

    /// Trailing SMA window. Must be positive.
    #[serde(default = "default_ma_window")]
    pub ma_window: usize,

    // --- Endpoints ---------------------------------------------------------

    /// Address the display API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Upstream price WebSocket. `{symbol}` and `{timeframe}` are substituted.
    #[serde(default = "default_price_feed_url")]
    pub price_feed_url: String,

    /// Upstream signal push WebSocket.
    #[serde(default = "default_signal_feed_url")]
    pub signal_feed_url: String,

    /// Base URL of the upstream signal snapshot API.
    #[serde(default = "default_signal_api_url")]
    pub signal_api_url: String,

    // --- Plumbing ----------------------------------------------------------

    /// Delay before reconnecting a dropped upstream feed.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Bound of the per-session inbound price channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Bound of the outbound render broadcast channel.
    #[serde(default = "default_render_channel_capacity")]
    pub render_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            timeframes: default_timeframes(),
            default_timeframe: default_timeframe(),
            ma_window: default_ma_window(),
            bind_addr: default_bind_addr(),
            price_feed_url: default_price_feed_url(),
            signal_feed_url: default_signal_feed_url(),
            signal_api_url: default_signal_api_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            render_channel_capacity: default_render_channel_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            ma_window = config.ma_window,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `CANDLE_STREAM_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(syms) = lookup("CANDLE_STREAM_SYMBOLS") {
            self.symbols = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(addr) = lookup("CANDLE_STREAM_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(url) = lookup("CANDLE_STREAM_PRICE_FEED_URL") {
            self.price_feed_url = url;
        }
        if let Some(url) = lookup("CANDLE_STREAM_SIGNAL_FEED_URL") {
            self.signal_feed_url = url;
        }
        if let Some(url) = lookup("CANDLE_STREAM_SIGNAL_API_URL") {
            self.signal_api_url = url;
        }
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.ma_window == 0 {
            bail!("ma_window must be positive");
        }
        if self.symbols.is_empty() {
            bail!("at least one symbol must be configured");
        }
        if self.timeframes.is_empty() {
            bail!("at least one timeframe must be configured");
        }
        for tf in &self.timeframes {
            timeframe_minutes(tf)?;
        }
        if !self.supports_timeframe(&self.default_timeframe) {
            bail!(
                "default timeframe {} is not in the configured timeframes",
                self.default_timeframe
            );
        }
        if self.event_channel_capacity == 0 || self.render_channel_capacity == 0 {
            bail!("channel capacities must be positive");
        }
        Ok(())
    }

    pub fn supports_timeframe(&self, tf: &str) -> bool {
        self.timeframes.iter().any(|t| t == tf)
    }

    /// The selection shown at startup.
    pub fn initial_selection(&self) -> Selection {
        let symbol = self.symbols.first().map(String::as_str).unwrap_or("AAPL");
        Selection::new(symbol, self.default_timeframe.clone())
    }

    /// The upstream price feed URL for `selection`.
    pub fn price_feed_url_for(&self, selection: &Selection) -> String {
        self.price_feed_url
            .replace("{symbol}", &selection.symbol)
            .replace("{timeframe}", &selection.timeframe)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols, vec!["AAPL"]);
        assert_eq!(cfg.timeframes.len(), 8);
        assert_eq!(cfg.timeframes[0], "4hour");
        assert_eq!(cfg.timeframes[7], "1min");
        assert_eq!(cfg.default_timeframe, "1min");
        assert_eq!(cfg.ma_window, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.ma_window, 10);
        assert_eq!(cfg.reconnect_delay_secs, 5);
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "ma_window": 20, "symbols": ["MSFT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.ma_window, 20);
        assert_eq!(cfg.symbols, vec!["MSFT"]);
        assert_eq!(cfg.default_timeframe, "1min");
    }

    #[test]
    fn zero_window_fails_validation() {
        let cfg = RuntimeConfig {
            ma_window: 0,
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_default_timeframe_fails_validation() {
        let cfg = RuntimeConfig {
            default_timeframe: "7min".into(),
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = RuntimeConfig {
            timeframes: vec!["1day".into()],
            default_timeframe: "1day".into(),
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_replace_fields() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|key| match key {
            "CANDLE_STREAM_SYMBOLS" => Some("msft, tsla,,".into()),
            "CANDLE_STREAM_BIND_ADDR" => Some("127.0.0.1:9000".into()),
            _ => None,
        });
        assert_eq!(cfg.symbols, vec!["MSFT", "TSLA"]);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.signal_api_url, "http://127.0.0.1:5000");
    }

    #[test]
    fn initial_selection_and_feed_url() {
        let cfg = RuntimeConfig::default();
        let sel = cfg.initial_selection();
        assert_eq!(sel, Selection::new("AAPL", "1min"));
        assert_eq!(
            cfg.price_feed_url_for(&sel),
            "ws://127.0.0.1:5000/prices?symbol=AAPL&tf=1min"
        );
    }

    #[test]
    fn save_then_load_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "candle_stream_cfg_{}.json",
            uuid::Uuid::new_v4()
        ));
        let cfg = RuntimeConfig {
            ma_window: 14,
            ..RuntimeConfig::default()
        };
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.ma_window, 14);
        assert_eq!(loaded.timeframes, cfg.timeframes);
        let _ = std::fs::remove_file(&path);
    }
}
