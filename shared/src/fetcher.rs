//! Paginated, window-bounded series retrieval

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::data::{bucket_label, Candle, Granularity, RawCandle, TimeWindow, Timeframe};
use crate::exchange::{ExchangeConnector, ExchangeSession, MAX_PAGE_LIMIT};
use crate::Result;

/// A break in the series where consecutive candles are not one step apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// Open time of the candle before the break
    pub timestamp: i64,
    /// Open time of the candle after the break
    pub next_timestamp: i64,
}

impl Gap {
    pub fn delta_ms(&self) -> i64 {
        self.next_timestamp - self.timestamp
    }
}

/// Every consecutive pair whose distance is not exactly `step_ms`
pub fn detect_gaps(candles: &[RawCandle], step_ms: i64) -> Vec<Gap> {
    candles
        .windows(2)
        .filter(|pair| pair[1].timestamp - pair[0].timestamp != step_ms)
        .map(|pair| Gap {
            timestamp: pair[0].timestamp,
            next_timestamp: pair[1].timestamp,
        })
        .collect()
}

/// Assembles one symbol/timeframe series from exchange pages
#[derive(Clone)]
pub struct SeriesFetcher {
    connector: Arc<dyn ExchangeConnector>,
    page_limit: usize,
    page_delay: Duration,
}

impl SeriesFetcher {
    pub fn new(connector: Arc<dyn ExchangeConnector>) -> Self {
        Self {
            connector,
            page_limit: MAX_PAGE_LIMIT,
            page_delay: Duration::ZERO,
        }
    }

    /// Candles requested per page, clamped to `1..=MAX_PAGE_LIMIT`
    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    /// Pause between consecutive page requests
    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Fetch `[window.start_ms, window.end_ms)` for one timeframe.
    ///
    /// Any exchange error aborts the whole series; no partial result is returned.
    /// The session is closed before returning, whatever the outcome. If this future
    /// is dropped mid-flight, dropping the session releases it instead.
    pub async fn fetch_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<Candle>> {
        let mut session = self.connector.connect().await?;
        let collected = self
            .collect_pages(session.as_mut(), symbol, timeframe, window)
            .await;
        session.close().await;
        let raw = collected?;

        for gap in detect_gaps(&raw, timeframe.step_ms()) {
            warn!(
                symbol = symbol,
                timeframe = %timeframe,
                bucket = %bucket_label(gap.timestamp, Granularity::Second).unwrap_or_default(),
                delta_ms = gap.delta_ms(),
                "Gap in exchange series"
            );
        }

        let granularity = timeframe.granularity();
        let candles = raw
            .iter()
            .map(|c| Candle::from_raw(c, granularity))
            .collect::<Result<Vec<_>>>()?;

        info!(
            exchange = self.connector.name(),
            symbol = symbol,
            timeframe = %timeframe,
            candles = candles.len(),
            "Fetched series"
        );
        Ok(candles)
    }

    async fn collect_pages(
        &self,
        session: &mut dyn ExchangeSession,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<RawCandle>> {
        let step = timeframe.step_ms();
        let mut cursor = window.start_ms;
        let mut candles: Vec<RawCandle> = Vec::new();

        loop {
            let page = session
                .fetch_ohlcv(symbol, timeframe, cursor, self.page_limit)
                .await?;

            let last = match page.last() {
                Some(candle) => candle.timestamp,
                None => break,
            };

            if last >= window.end_ms {
                candles.extend(
                    page.into_iter()
                        .filter(|c| c.timestamp >= cursor)
                        .take_while(|c| c.timestamp < window.end_ms),
                );
                break;
            }

            if last < cursor {
                warn!(
                    symbol = symbol,
                    timeframe = %timeframe,
                    cursor = cursor,
                    last = last,
                    "Exchange page did not advance, stopping pagination"
                );
                break;
            }

            candles.extend(page.into_iter().filter(|c| c.timestamp >= cursor));
            cursor = last + step;
            debug!(symbol = symbol, timeframe = %timeframe, cursor = cursor, "Next page");

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DAY_MS;
    use crate::KlineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const HOUR: i64 = 3_600_000;
    // 2023-11-15T00:00:00Z
    const D0: i64 = 19676 * DAY_MS;

    /// Serves a fixed candle list, honouring `since` and `limit`
    struct ListConnector {
        candles: Vec<RawCandle>,
        fail_on_call: Option<usize>,
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        sinces: Arc<Mutex<Vec<i64>>>,
    }

    struct ListSession {
        candles: Vec<RawCandle>,
        fail_on_call: Option<usize>,
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        sinces: Arc<Mutex<Vec<i64>>>,
    }

    impl ListConnector {
        fn new(candles: Vec<RawCandle>) -> Self {
            Self {
                candles,
                fail_on_call: None,
                calls: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
                sinces: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ExchangeConnector for ListConnector {
        fn name(&self) -> &str {
            "list"
        }

        async fn connect(&self) -> Result<Box<dyn ExchangeSession>> {
            Ok(Box::new(ListSession {
                candles: self.candles.clone(),
                fail_on_call: self.fail_on_call,
                calls: self.calls.clone(),
                closed: self.closed.clone(),
                sinces: self.sinces.clone(),
            }))
        }
    }

    #[async_trait]
    impl ExchangeSession for ListSession {
        async fn fetch_ohlcv(
            &mut self,
            _pair: &str,
            _timeframe: Timeframe,
            since_ms: i64,
            limit: usize,
        ) -> Result<Vec<RawCandle>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.sinces.lock().unwrap().push(since_ms);
            if self.fail_on_call == Some(call) {
                return Err(KlineError::Exchange("boom".to_string()));
            }
            Ok(self
                .candles
                .iter()
                .filter(|c| c.timestamp >= since_ms)
                .take(limit)
                .copied()
                .collect())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn hourly(start: i64, count: usize) -> Vec<RawCandle> {
        (0..count as i64)
            .map(|i| RawCandle::new(start + i * HOUR, 1.0, 2.0, 0.5, 1.5, 10.0))
            .collect()
    }

    fn window() -> TimeWindow {
        TimeWindow { start_ms: D0, end_ms: D0 + 2 * DAY_MS }
    }

    #[test]
    fn test_detect_gaps() {
        let mut candles = hourly(0, 5);
        assert!(detect_gaps(&candles, HOUR).is_empty());

        candles.remove(2);
        let gaps = detect_gaps(&candles, HOUR);
        assert_eq!(gaps, vec![Gap { timestamp: HOUR, next_timestamp: 3 * HOUR }]);
        assert_eq!(gaps[0].delta_ms(), 2 * HOUR);
    }

    #[test]
    fn test_detect_gaps_checks_last_pair() {
        let mut candles = hourly(0, 3);
        candles.push(RawCandle::new(10 * HOUR, 1.0, 1.0, 1.0, 1.0, 1.0));
        assert_eq!(detect_gaps(&candles, HOUR).len(), 1);
    }

    #[tokio::test]
    async fn test_paginates_and_trims_to_window() {
        // history runs a day past the window end
        let connector = ListConnector::new(hourly(D0, 72));
        let calls = connector.calls.clone();
        let closed = connector.closed.clone();
        let fetcher = SeriesFetcher::new(Arc::new(connector)).with_page_limit(10);

        let tf = Timeframe::parse("1h").unwrap();
        let candles = fetcher.fetch_series("BTCUSDT", tf, window()).await.unwrap();

        assert_eq!(candles.len(), 48);
        assert!(candles.iter().all(|c| window().contains(c.timestamp)));
        assert!(candles.windows(2).all(|w| w[1].timestamp - w[0].timestamp == HOUR));
        assert_eq!(candles[0].bucket, "2023-11-15-00");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cursor_advances_by_one_step() {
        let connector = ListConnector::new(hourly(D0, 72));
        let sinces = connector.sinces.clone();
        let fetcher = SeriesFetcher::new(Arc::new(connector)).with_page_limit(24);

        let tf = Timeframe::parse("1h").unwrap();
        fetcher.fetch_series("BTCUSDT", tf, window()).await.unwrap();

        let sinces = sinces.lock().unwrap().clone();
        assert_eq!(sinces, vec![D0, D0 + DAY_MS, D0 + 2 * DAY_MS]);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        // history ends before the window does
        let connector = ListConnector::new(hourly(D0, 30));
        let calls = connector.calls.clone();
        let fetcher = SeriesFetcher::new(Arc::new(connector)).with_page_limit(20);

        let tf = Timeframe::parse("1h").unwrap();
        let candles = fetcher.fetch_series("BTCUSDT", tf, window()).await.unwrap();

        assert_eq!(candles.len(), 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_drops_candles_before_window() {
        let connector = ListConnector::new(hourly(D0 - DAY_MS, 24 * 4));
        let fetcher = SeriesFetcher::new(Arc::new(connector));

        let tf = Timeframe::parse("1h").unwrap();
        let candles = fetcher.fetch_series("BTCUSDT", tf, window()).await.unwrap();

        assert_eq!(candles.len(), 48);
        assert_eq!(candles[0].timestamp, D0);
    }

    #[tokio::test]
    async fn test_gap_is_reported_not_repaired() {
        let mut raw = hourly(D0, 60);
        raw.remove(5);
        let fetcher = SeriesFetcher::new(Arc::new(ListConnector::new(raw)));

        let tf = Timeframe::parse("1h").unwrap();
        let candles = fetcher.fetch_series("BTCUSDT", tf, window()).await.unwrap();

        assert_eq!(candles.len(), 47);
    }

    #[tokio::test]
    async fn test_error_aborts_and_closes_session() {
        let mut connector = ListConnector::new(hourly(D0, 72));
        connector.fail_on_call = Some(2);
        let closed = connector.closed.clone();
        let fetcher = SeriesFetcher::new(Arc::new(connector)).with_page_limit(10);

        let tf = Timeframe::parse("1h").unwrap();
        let err = fetcher.fetch_series("BTCUSDT", tf, window()).await.unwrap_err();

        assert!(matches!(err, KlineError::Exchange(_)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
