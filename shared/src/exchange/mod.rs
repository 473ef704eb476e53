//! Exchange integration module
//!
//! The fetcher only sees these two traits; `BybitConnector` is the production
//! implementation and tests plug in scripted ones.

pub mod bybit;

pub use bybit::*;

use async_trait::async_trait;

use crate::data::{RawCandle, Timeframe};
use crate::Result;

/// Hard page size cap of the exchange API
pub const MAX_PAGE_LIMIT: usize = 1000;

/// One open connection to the exchange.
///
/// Sessions are created per timeframe fetch and must be closed by the caller on
/// every exit path.
#[async_trait]
pub trait ExchangeSession: Send {
    /// Up to `limit` candles opening at or after `since_ms`, oldest first.
    /// An empty page means there is no more history.
    async fn fetch_ohlcv(
        &mut self,
        pair: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawCandle>>;

    /// Release the connection
    async fn close(&mut self);
}

/// Factory for fresh exchange sessions
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Exchange name (for logging)
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn ExchangeSession>>;
}
