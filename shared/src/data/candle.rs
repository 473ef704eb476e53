//! OHLCV candle data structures

use serde::{Deserialize, Serialize};

use crate::data::time::{bucket_label, parse_bucket_label, Granularity};
use crate::Result;

/// OHLCV row as returned by the exchange, before normalisation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawCandle {
    /// Open time in epoch milliseconds
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl RawCandle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Normalised OHLCV candle
///
/// Keeps the epoch timestamp next to the calendar bucket label, so the label can
/// stay lossy without losing ordering. Serialises as
/// `[bucket, open, high, low, close, volume, timestamp]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CandleRow", try_from = "CandleRow")]
pub struct Candle {
    /// Open time in epoch milliseconds
    pub timestamp: i64,
    /// Calendar bucket label (e.g. "2023-11-14" or "2023-11-14-22")
    pub bucket: String,
    /// Opening price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Volume
    pub volume: f64,
}

impl Candle {
    /// Create a new candle
    pub fn new(
        timestamp: i64,
        bucket: String,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            bucket,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Normalise a raw exchange row into a candle bucketed at `granularity`
    pub fn from_raw(raw: &RawCandle, granularity: Granularity) -> Result<Self> {
        Ok(Self {
            timestamp: raw.timestamp,
            bucket: bucket_label(raw.timestamp, granularity)?,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
        })
    }
}

/// On-disk / wire layout of a candle.
///
/// `Legacy` rows carry only the label in position 0; they are what older cache
/// files contain.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CandleRow {
    Full(String, f64, f64, f64, f64, f64, i64),
    Legacy(String, f64, f64, f64, f64, f64),
}

impl From<Candle> for CandleRow {
    fn from(c: Candle) -> Self {
        CandleRow::Full(c.bucket, c.open, c.high, c.low, c.close, c.volume, c.timestamp)
    }
}

impl TryFrom<CandleRow> for Candle {
    type Error = String;

    fn try_from(row: CandleRow) -> std::result::Result<Self, Self::Error> {
        match row {
            CandleRow::Full(bucket, open, high, low, close, volume, timestamp) => {
                Ok(Candle::new(timestamp, bucket, open, high, low, close, volume))
            }
            CandleRow::Legacy(bucket, open, high, low, close, volume) => {
                let timestamp = parse_bucket_label(&bucket)
                    .ok_or_else(|| format!("unrecognised bucket label '{}'", bucket))?;
                Ok(Candle::new(timestamp, bucket, open, high, low, close, volume))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_serializes_as_row() {
        let candle = Candle::new(
            1700000000000,
            "2023-11-14".to_string(),
            100.0,
            110.0,
            95.0,
            105.5,
            1000.0,
        );

        let json = serde_json::to_string(&candle).unwrap();
        assert_eq!(json, r#"["2023-11-14",100.0,110.0,95.0,105.5,1000.0,1700000000000]"#);

        let back: Candle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, candle);
    }

    #[test]
    fn test_legacy_row_recovers_timestamp() {
        let candle: Candle =
            serde_json::from_str(r#"["2023-11-14-22", 1, 2, 0.5, 1.5, 42]"#).unwrap();

        assert_eq!(candle.bucket, "2023-11-14-22");
        assert_eq!(candle.timestamp, 1699999200000);
        assert_eq!(candle.high, 2.0);
        assert_eq!(candle.volume, 42.0);
    }

    #[test]
    fn test_legacy_row_with_bad_label_is_rejected() {
        let result: std::result::Result<Candle, _> =
            serde_json::from_str(r#"["yesterday", 1, 2, 0.5, 1.5, 42]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_raw_buckets_by_granularity() {
        let raw = RawCandle::new(1700000000000, 1.0, 2.0, 0.5, 1.5, 10.0);

        let daily = Candle::from_raw(&raw, Granularity::Day).unwrap();
        assert_eq!(daily.bucket, "2023-11-14");
        assert_eq!(daily.timestamp, 1700000000000);

        let minute = Candle::from_raw(&raw, Granularity::Minute).unwrap();
        assert_eq!(minute.bucket, "2023-11-14-22-13");
    }
}
