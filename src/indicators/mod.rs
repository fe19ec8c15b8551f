// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Derived series maintained alongside the candle series.  Undefined warm-up
// values are represented as `None` rather than NaN so they serialise as JSON
// `null` on the render wire.

pub mod moving_average;

pub use moving_average::MovingAverageEngine;
