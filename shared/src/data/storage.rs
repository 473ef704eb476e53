//! On-disk candle cache: one JSON file per symbol and timeframe

use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::data::Candle;
use crate::{KlineError, Result};

/// File-backed cache laid out as `<root>/<symbol>/<timeframe>.json`.
///
/// A present file is treated as permanently valid; there is no TTL. Every write
/// goes through its own uniquely named temporary file in the symbol directory and
/// is renamed over the target, so readers never see a half-written series.
/// Concurrent writers of the same file race and the last rename wins.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding all cached timeframes of a symbol
    pub fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(symbol)
    }

    /// Cache file for a symbol and timeframe
    pub fn path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{}.json", timeframe))
    }

    /// Create the symbol directory if it does not exist yet
    pub async fn ensure_symbol_dir(&self, symbol: &str) -> Result<()> {
        let dir = self.symbol_dir(symbol);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| KlineError::io(dir, e))
    }

    /// Whether a cached file exists for this symbol and timeframe
    pub async fn exists(&self, symbol: &str, timeframe: &str) -> bool {
        tokio::fs::try_exists(self.path(symbol, timeframe))
            .await
            .unwrap_or(false)
    }

    /// Load a cached series
    pub async fn load(&self, symbol: &str, timeframe: &str) -> Result<Vec<Candle>> {
        let path = self.path(symbol, timeframe);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(KlineError::NotFound(path)),
            Err(e) => return Err(KlineError::io(path, e)),
        };

        let candles: Vec<Candle> = serde_json::from_slice(&bytes)
            .map_err(|source| KlineError::Decode { path: path.clone(), source })?;

        debug!(
            symbol = symbol,
            timeframe = timeframe,
            candles = candles.len(),
            "Loaded cached series"
        );
        Ok(candles)
    }

    /// Overwrite the cached series, creating the symbol directory when needed
    pub async fn save(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> Result<()> {
        self.ensure_symbol_dir(symbol).await?;

        let dir = self.symbol_dir(symbol);
        let path = self.path(symbol, timeframe);

        let bytes = serde_json::to_vec(candles).map_err(|source| KlineError::Encode {
            path: path.clone(),
            source,
        })?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| KlineError::io(&dir, e))?;
            tmp.write_all(&bytes).map_err(|e| KlineError::io(tmp.path(), e))?;
            tmp.persist(&target).map_err(|e| KlineError::io(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| KlineError::io(&path, std::io::Error::new(ErrorKind::Other, e)))??;

        debug!(
            symbol = symbol,
            timeframe = timeframe,
            candles = candles.len(),
            path = %path.display(),
            "Saved series to cache"
        );
        Ok(())
    }
}
