//! Data management module
//!
//! Candle model, timeframe parsing, calendar bucketing and the on-disk cache.

pub mod candle;
pub mod storage;
pub mod time;
pub mod timeframe;

pub use candle::*;
pub use storage::*;
pub use time::*;
pub use timeframe::*;
