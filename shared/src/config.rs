use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;

use crate::data::{Timeframe, DEFAULT_TIMEFRAMES};
use crate::dataset::{FailurePolicy, FetchOptions};
use crate::exchange::{BYBIT_BASE_URL, MAX_PAGE_LIMIT};
use crate::{KlineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub bind_addr: SocketAddr,
    pub cors_origins: Vec<String>,
    pub exchange_base_url: String,
    pub exchange_category: String,
    pub exchange_http_timeout: Duration,
    pub page_limit: usize,
    pub page_delay: Duration,
    pub fetch_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub allowed_timeframes: Vec<Timeframe>,
    pub default_symbol: String,
    pub default_days: u32,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let allowed_timeframes = var("ALLOWED_TIMEFRAMES", &DEFAULT_TIMEFRAMES.join(","))
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                Timeframe::parse(t)
                    .map_err(|e| KlineError::Config(format!("ALLOWED_TIMEFRAMES: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let fetch_timeout_secs: u64 =
            parse_var("FETCH_TIMEOUT_SECS", &var("FETCH_TIMEOUT_SECS", "600"))?;

        Ok(Config {
            data_dir: var("DATA_DIR", "./data"),
            bind_addr: parse_var("BIND_ADDR", &var("BIND_ADDR", "127.0.0.1:5000"))?,
            cors_origins: var("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            exchange_base_url: var("EXCHANGE_BASE_URL", BYBIT_BASE_URL),
            exchange_category: var("EXCHANGE_CATEGORY", "spot"),
            exchange_http_timeout: Duration::from_secs(parse_var(
                "EXCHANGE_HTTP_TIMEOUT_SECS",
                &var("EXCHANGE_HTTP_TIMEOUT_SECS", "30"),
            )?),
            page_limit: parse_var::<usize>("PAGE_LIMIT", &var("PAGE_LIMIT", "1000"))?
                .clamp(1, MAX_PAGE_LIMIT),
            page_delay: Duration::from_millis(parse_var(
                "PAGE_DELAY_MS",
                &var("PAGE_DELAY_MS", "100"),
            )?),
            fetch_timeout: (fetch_timeout_secs > 0)
                .then(|| Duration::from_secs(fetch_timeout_secs)),
            failure_policy: var("FETCH_FAILURE_POLICY", "degrade").parse()?,
            allowed_timeframes,
            default_symbol: var("DEFAULT_SYMBOL", "BTCUSDT"),
            default_days: parse_var("DEFAULT_DAYS", &var("DEFAULT_DAYS", "1000"))?,
            log_format: match var("LOG_FORMAT", "pretty").to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            policy: self.failure_policy,
            timeout: self.fetch_timeout,
            allowed_timeframes: self.allowed_timeframes.clone(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| KlineError::Config(format!("{} has an invalid value: '{}'", key, value)))
}
