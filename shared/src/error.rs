use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum KlineError {
    /// No cached file for the requested symbol/timeframe.
    #[error("Cache file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Exchange request failed: {0}")]
    Exchange(String),

    #[error("Unknown timeframe token: {0}")]
    UnknownTimeframe(String),

    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KlineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KlineError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for KlineError {
    fn from(err: reqwest::Error) -> Self {
        KlineError::Exchange(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KlineError>;
