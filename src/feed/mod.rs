// =============================================================================
// Upstream Feeds
// =============================================================================
//
// Adapters between the upstream WebSocket/HTTP endpoints and the core:
// - price: `init_candles` / `new_candle` frames into the session's channel
// - signal: pushed and fetched signal records, freshness-checked on arrival

pub mod price;
pub mod signal;
