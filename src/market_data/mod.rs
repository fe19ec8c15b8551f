pub mod candle;
pub mod candle_series;

pub use candle::{BarRecord, Candle};
pub use candle_series::{CandleSeries, UpdateKind};
