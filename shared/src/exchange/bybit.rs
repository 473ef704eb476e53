//! Bybit v5 REST client for historical klines

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::data::{RawCandle, TimeUnit, Timeframe};
use crate::exchange::{ExchangeConnector, ExchangeSession, MAX_PAGE_LIMIT};
use crate::{KlineError, Result};

pub const BYBIT_BASE_URL: &str = "https://api.bybit.com";

/// Bybit API response envelope
#[derive(Debug, Deserialize)]
struct BybitResponse {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    #[serde(default)]
    result: BybitResult,
}

#[derive(Debug, Default, Deserialize)]
struct BybitResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

/// Bybit interval code for a timeframe
pub fn bybit_interval(timeframe: Timeframe) -> Result<String> {
    let count = timeframe.count();
    let code = match timeframe.unit() {
        TimeUnit::Minute if matches!(count, 1 | 3 | 5 | 15 | 30) => count.to_string(),
        TimeUnit::Hour if matches!(count, 1 | 2 | 4 | 6 | 12) => (count * 60).to_string(),
        TimeUnit::Day if count == 1 => "D".to_string(),
        _ => return Err(KlineError::UnsupportedTimeframe(timeframe.to_string())),
    };
    Ok(code)
}

/// Creates one HTTP client per session
#[derive(Debug, Clone)]
pub struct BybitConnector {
    base_url: String,
    category: String,
    request_timeout: Duration,
}

impl BybitConnector {
    pub fn new(base_url: &str, category: &str, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            category: category.to_string(),
            request_timeout,
        }
    }
}

impl Default for BybitConnector {
    fn default() -> Self {
        Self::new(BYBIT_BASE_URL, "spot", Duration::from_secs(30))
    }
}

#[async_trait]
impl ExchangeConnector for BybitConnector {
    fn name(&self) -> &str {
        "bybit"
    }

    async fn connect(&self) -> Result<Box<dyn ExchangeSession>> {
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;

        debug!(base_url = %self.base_url, "Opened Bybit session");

        Ok(Box::new(BybitSession {
            client: Some(client),
            base_url: self.base_url.clone(),
            category: self.category.clone(),
        }))
    }
}

/// Open Bybit session; `client` is dropped on close
pub struct BybitSession {
    client: Option<reqwest::Client>,
    base_url: String,
    category: String,
}

#[async_trait]
impl ExchangeSession for BybitSession {
    async fn fetch_ohlcv(
        &mut self,
        pair: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawCandle>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| KlineError::Exchange("session already closed".to_string()))?;

        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let interval = bybit_interval(timeframe)?;
        let symbol = pair.replace('/', "");
        let end_ms = since_ms + timeframe.step_ms() * limit as i64 - 1;

        let start = since_ms.to_string();
        let end = end_ms.to_string();
        let limit_param = limit.to_string();

        let url = format!("{}/v5/market/kline", self.base_url);
        let response = client
            .get(&url)
            .query(&[
                ("category", self.category.as_str()),
                ("symbol", symbol.as_str()),
                ("interval", interval.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(KlineError::Exchange(format!(
                "Bybit returned status {}: {}",
                status, body
            )));
        }

        let data: BybitResponse = response.json().await?;
        if data.ret_code != 0 {
            return Err(KlineError::Exchange(format!(
                "Bybit error {}: {}",
                data.ret_code, data.ret_msg
            )));
        }

        let mut candles = parse_rows(data.result.list);
        candles.sort_by_key(|c| c.timestamp);

        debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            since_ms = since_ms,
            candles = candles.len(),
            "Fetched kline page"
        );
        Ok(candles)
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            info!("Closed Bybit session");
        }
    }
}

/// Parse Bybit string rows `[start, open, high, low, close, volume, turnover]`
fn parse_rows(rows: Vec<Vec<String>>) -> Vec<RawCandle> {
    rows.into_iter()
        .filter_map(|row| {
            if row.len() < 6 {
                warn!(?row, "Skipping short kline row");
                return None;
            }
            let candle = parse_row(&row);
            if candle.is_none() {
                warn!(?row, "Skipping kline row with unparseable fields");
            }
            candle
        })
        .collect()
}

fn parse_row(row: &[String]) -> Option<RawCandle> {
    Some(RawCandle::new(
        row[0].parse().ok()?,
        row[1].parse().ok()?,
        row[2].parse().ok()?,
        row[3].parse().ok()?,
        row[4].parse().ok()?,
        row[5].parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_mapping() {
        let code = |t: &str| bybit_interval(Timeframe::parse(t).unwrap());
        assert_eq!(code("1d").unwrap(), "D");
        assert_eq!(code("4h").unwrap(), "240");
        assert_eq!(code("1h").unwrap(), "60");
        assert_eq!(code("15m").unwrap(), "15");
        assert_eq!(code("5m").unwrap(), "5");
        assert!(matches!(code("7m"), Err(KlineError::UnsupportedTimeframe(_))));
        assert!(matches!(code("2d"), Err(KlineError::UnsupportedTimeframe(_))));
    }

    #[test]
    fn test_parse_rows_skips_malformed() {
        let rows = vec![
            vec!["1700000000000", "1", "2", "0.5", "1.5", "10", "15"],
            vec!["oops", "1", "2", "0.5", "1.5", "10", "15"],
            vec!["1700000300000", "1"],
        ]
        .into_iter()
        .map(|r| r.into_iter().map(String::from).collect())
        .collect();

        let candles = parse_rows(rows);
        assert_eq!(candles, vec![RawCandle::new(1700000000000, 1.0, 2.0, 0.5, 1.5, 10.0)]);
    }

    #[test]
    fn test_parse_row_rejects_bad_numbers() {
        let row = |r: [&str; 6]| r.iter().map(|f| f.to_string()).collect::<Vec<_>>();

        assert_eq!(
            parse_row(&row(["1700000000000", "1", "2", "0.5", "1.5", "10"])),
            Some(RawCandle::new(1700000000000, 1.0, 2.0, 0.5, 1.5, 10.0))
        );
        assert_eq!(parse_row(&row(["1700000000000", "1", "2", "n/a", "1.5", "10"])), None);
        assert_eq!(parse_row(&row(["1.7e12", "1", "2", "0.5", "1.5", "10"])), None);
    }

    #[test]
    fn test_error_envelope_decodes() {
        let body = r#"{"retCode":10001,"retMsg":"params error","result":{}}"#;
        let data: BybitResponse = serde_json::from_str(body).unwrap();
        assert_eq!(data.ret_code, 10001);
        assert!(data.result.list.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_fetch() {
        let connector = BybitConnector::default();
        let mut session = connector.connect().await.unwrap();
        session.close().await;

        let err = session
            .fetch_ohlcv("BTCUSDT", Timeframe::parse("1d").unwrap(), 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, KlineError::Exchange(_)));
    }
}
