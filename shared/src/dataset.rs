//! Multi-timeframe dataset assembly: cache first, concurrent fetch for the rest

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::data::{CacheStore, Candle, TimeWindow, Timeframe, DEFAULT_TIMEFRAMES};
use crate::fetcher::SeriesFetcher;
use crate::{KlineError, Result};

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Key in [`SymbolDataset::errors`] used when the symbol itself was rejected
pub const SYMBOL_ERROR_KEY: &str = "symbol";

/// What to do when a timeframe cannot be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Serve an empty series with an error marker
    #[default]
    Degrade,
    /// Retry this many more times, then degrade
    Retry(u32),
    /// Fail the whole request
    Fail,
}

impl FromStr for FailurePolicy {
    type Err = KlineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "degrade" => Ok(FailurePolicy::Degrade),
            "fail" => Ok(FailurePolicy::Fail),
            _ => s
                .strip_prefix("retry:")
                .and_then(|n| n.parse().ok())
                .map(FailurePolicy::Retry)
                .ok_or_else(|| KlineError::Config(format!("Invalid failure policy: {}", s))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Degrade => write!(f, "degrade"),
            FailurePolicy::Retry(n) => write!(f, "retry:{}", n),
            FailurePolicy::Fail => write!(f, "fail"),
        }
    }
}

/// Knobs of the dataset service
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub policy: FailurePolicy,
    /// Upper bound for one timeframe fetch, `None` waits forever
    pub timeout: Option<Duration>,
    /// Timeframes the service agrees to fetch
    pub allowed_timeframes: Vec<Timeframe>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            timeout: Some(Duration::from_secs(600)),
            allowed_timeframes: DEFAULT_TIMEFRAMES
                .iter()
                .filter_map(|t| Timeframe::parse(t).ok())
                .collect(),
        }
    }
}

/// Request for one symbol across several timeframes
#[derive(Debug, Clone)]
pub struct DatasetRequest {
    pub symbol: String,
    pub timeframes: Vec<String>,
    pub days: u32,
}

impl DatasetRequest {
    pub fn new(symbol: &str, timeframes: &[&str], days: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframes: timeframes.iter().map(|t| t.to_string()).collect(),
            days,
        }
    }
}

/// Series per timeframe for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolDataset {
    pub name: String,
    pub data: BTreeMap<String, Vec<Candle>>,
    /// Failure markers keyed by the requested timeframe token, or by
    /// [`SYMBOL_ERROR_KEY`] when the symbol was rejected and nothing was served.
    /// Absent from JSON when empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl SymbolDataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }
}

/// Strip `/` separators and upper-case; only ASCII alphanumerics are accepted
/// because the symbol becomes a directory name.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol: String = raw.trim().replace('/', "").to_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(KlineError::InvalidSymbol(raw.to_string()));
    }
    Ok(symbol)
}

/// Serves datasets from the cache and fetches what is missing
#[derive(Clone)]
pub struct DatasetService {
    store: CacheStore,
    fetcher: SeriesFetcher,
    options: FetchOptions,
}

impl DatasetService {
    pub fn new(store: CacheStore, fetcher: SeriesFetcher, options: FetchOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    /// Dataset for the last `request.days` completed UTC days
    pub async fn get_dataset(&self, request: &DatasetRequest) -> Result<SymbolDataset> {
        self.get_dataset_in(request, TimeWindow::last_days(request.days))
            .await
    }

    /// Dataset over an explicit window.
    ///
    /// Only returns `Err` under [`FailurePolicy::Fail`]; every other problem ends up
    /// as an entry in `errors` next to whatever data could be served.
    pub async fn get_dataset_in(
        &self,
        request: &DatasetRequest,
        window: TimeWindow,
    ) -> Result<SymbolDataset> {
        let symbol = match normalize_symbol(&request.symbol) {
            Ok(symbol) => symbol,
            Err(e) => {
                warn!(symbol = %request.symbol, "Rejected symbol");
                let mut dataset = SymbolDataset::new(request.symbol.replace('/', ""));
                dataset.errors.insert(SYMBOL_ERROR_KEY.to_string(), e.to_string());
                return Ok(dataset);
            }
        };

        let mut dataset = SymbolDataset::new(symbol.clone());

        if let Err(e) = self.store.ensure_symbol_dir(&symbol).await {
            warn!(symbol = %symbol, error = %e, "Failed to create symbol directory");
        }

        let mut missing: Vec<Timeframe> = Vec::new();
        for token in &request.timeframes {
            let timeframe = match self.validate_timeframe(token) {
                Ok(timeframe) => timeframe,
                Err(e) => {
                    warn!(symbol = %symbol, timeframe = %token, error = %e, "Skipping timeframe");
                    dataset.errors.insert(token.clone(), e.to_string());
                    continue;
                }
            };
            let key = timeframe.to_string();
            if dataset.data.contains_key(&key) || missing.contains(&timeframe) {
                continue;
            }

            if !self.store.exists(&symbol, &key).await {
                missing.push(timeframe);
                continue;
            }

            match self.store.load(&symbol, &key).await {
                Ok(candles) => {
                    dataset.data.insert(key, candles);
                }
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        timeframe = %key,
                        error = %e,
                        "Unreadable cache file, refetching"
                    );
                    missing.push(timeframe);
                }
            }
        }

        info!(
            symbol = %symbol,
            cached = dataset.data.len(),
            missing = missing.len(),
            start_ms = window.start_ms,
            end_ms = window.end_ms,
            "Serving dataset"
        );

        if missing.is_empty() {
            return Ok(dataset);
        }

        let fetches = missing
            .iter()
            .map(|timeframe| self.fetch_with_policy(&symbol, *timeframe, window));
        let results = join_all(fetches).await;

        let mut failure: Option<KlineError> = None;
        for (timeframe, result) in missing.into_iter().zip(results) {
            let key = timeframe.to_string();
            match result {
                Ok(candles) => {
                    if !candles.is_empty() {
                        if let Err(e) = self.store.save(&symbol, &key, &candles).await {
                            error!(
                                symbol = %symbol,
                                timeframe = %key,
                                error = %e,
                                "Failed to save series"
                            );
                        }
                    }
                    dataset.data.insert(key, candles);
                }
                Err(e) => {
                    error!(
                        symbol = %symbol,
                        timeframe = %key,
                        error = %e,
                        "Failed to fetch series"
                    );
                    dataset.errors.insert(key.clone(), e.to_string());
                    if self.options.policy == FailurePolicy::Fail {
                        failure.get_or_insert(e);
                    } else {
                        dataset.data.insert(key, Vec::new());
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(dataset),
        }
    }

    fn validate_timeframe(&self, token: &str) -> Result<Timeframe> {
        let timeframe = Timeframe::parse(token)?;
        if !self.options.allowed_timeframes.contains(&timeframe) {
            return Err(KlineError::UnsupportedTimeframe(token.to_string()));
        }
        Ok(timeframe)
    }

    async fn fetch_with_policy(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<Candle>> {
        let retries = match self.options.policy {
            FailurePolicy::Retry(n) => n,
            FailurePolicy::Degrade | FailurePolicy::Fail => 0,
        };

        let mut attempt = 0;
        loop {
            match self.fetch_once(symbol, timeframe, window).await {
                Ok(candles) => return Ok(candles),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        symbol = symbol,
                        timeframe = %timeframe,
                        attempt = attempt,
                        error = %e,
                        "Retrying series fetch"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<Candle>> {
        let fetch = self.fetcher.fetch_series(symbol, timeframe, window);
        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| KlineError::Timeout(limit))?,
            None => fetch.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("BTC/USDT").unwrap(), "BTCUSDT");
        assert_eq!(normalize_symbol(" ethusdt ").unwrap(), "ETHUSDT");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("../etc").is_err());
        assert!(normalize_symbol("BTC\\USDT").is_err());
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("degrade".parse::<FailurePolicy>().unwrap(), FailurePolicy::Degrade);
        assert_eq!("FAIL".parse::<FailurePolicy>().unwrap(), FailurePolicy::Fail);
        assert_eq!("retry:3".parse::<FailurePolicy>().unwrap(), FailurePolicy::Retry(3));
        assert!("retry:x".parse::<FailurePolicy>().is_err());
        assert!("ignore".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::Retry(2).to_string(), "retry:2");
    }

    #[test]
    fn test_default_options_allow_default_timeframes() {
        let options = FetchOptions::default();
        assert_eq!(options.allowed_timeframes.len(), DEFAULT_TIMEFRAMES.len());
        assert_eq!(options.policy, FailurePolicy::Degrade);
    }

    #[test]
    fn test_dataset_omits_empty_errors() {
        let dataset = SymbolDataset::new("BTCUSDT");
        let json = serde_json::to_string(&dataset).unwrap();
        assert_eq!(json, r#"{"name":"BTCUSDT","data":{}}"#);
    }
}
