use std::sync::Arc;

use shared::{BybitConnector, CacheStore, Config, DatasetService, SeriesFetcher};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DatasetService>,
    pub default_symbol: String,
    pub default_days: u32,
}

impl AppState {
    pub fn new(service: DatasetService, default_symbol: &str, default_days: u32) -> Self {
        AppState {
            service: Arc::new(service),
            default_symbol: default_symbol.to_string(),
            default_days,
        }
    }

    /// Wire the Bybit connector, file cache and dataset service from config
    pub fn from_config(config: &Config) -> Self {
        let connector = BybitConnector::new(
            &config.exchange_base_url,
            &config.exchange_category,
            config.exchange_http_timeout,
        );
        let fetcher = SeriesFetcher::new(Arc::new(connector))
            .with_page_limit(config.page_limit)
            .with_page_delay(config.page_delay);
        let store = CacheStore::new(&config.data_dir);

        tracing::info!(
            data_dir = %config.data_dir,
            exchange = %config.exchange_base_url,
            policy = %config.failure_policy,
            "Dataset service configured"
        );

        Self::new(
            DatasetService::new(store, fetcher, config.fetch_options()),
            &config.default_symbol,
            config.default_days,
        )
    }
}
