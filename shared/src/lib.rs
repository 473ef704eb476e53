//! Kline cache service core
//!
//! Fetches OHLCV candles for a symbol across several timeframes from an exchange,
//! keeps them as one JSON file per symbol and timeframe, and assembles
//! multi-timeframe datasets from cache and fresh fetches.
//!
//! - [`data`]: candle model, timeframe parsing, calendar bucketing, file cache
//! - [`exchange`]: exchange capability traits and the Bybit connector
//! - [`fetcher`]: paginated, window-bounded series retrieval
//! - [`dataset`]: request orchestration across timeframes

pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod exchange;
pub mod fetcher;

pub use config::{Config, LogFormat};
pub use data::{CacheStore, Candle, RawCandle, TimeWindow, Timeframe, DEFAULT_TIMEFRAMES};
pub use dataset::{
    DatasetRequest, DatasetService, FailurePolicy, FetchOptions, SymbolDataset, SYMBOL_ERROR_KEY,
};
pub use error::{KlineError, Result};
pub use exchange::{BybitConnector, ExchangeConnector, ExchangeSession};
pub use fetcher::SeriesFetcher;
