use std::fmt;
use std::str::FromStr;

use crate::data::time::Granularity;
use crate::{KlineError, Result};

/// Timeframes served when a request does not name any
pub const DEFAULT_TIMEFRAMES: [&str; 5] = ["1d", "4h", "1h", "15m", "5m"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Day,
    Hour,
    Minute,
}

impl TimeUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'd' => Some(TimeUnit::Day),
            'h' => Some(TimeUnit::Hour),
            'm' => Some(TimeUnit::Minute),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            TimeUnit::Day => 'd',
            TimeUnit::Hour => 'h',
            TimeUnit::Minute => 'm',
        }
    }

    fn millis(&self) -> i64 {
        match self {
            TimeUnit::Day => 24 * 60 * 60 * 1000,
            TimeUnit::Hour => 60 * 60 * 1000,
            TimeUnit::Minute => 60 * 1000,
        }
    }
}

/// Candle bucket duration, e.g. "1d", "4h", "15m"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    count: u32,
    unit: TimeUnit,
}

impl Timeframe {
    /// Parse a `<integer><unit>` token with unit in {d, h, m}
    pub fn parse(token: &str) -> Result<Self> {
        let unknown = || KlineError::UnknownTimeframe(token.to_string());

        let mut chars = token.chars();
        let unit = chars
            .next_back()
            .and_then(TimeUnit::from_char)
            .ok_or_else(unknown)?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unknown());
        }
        let count: u32 = digits.parse().map_err(|_| unknown())?;
        if count == 0 {
            return Err(unknown());
        }

        Ok(Self { count, unit })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Duration in hours ("15m" is 0.25)
    pub fn hours(&self) -> f64 {
        self.step_ms() as f64 / 3_600_000.0
    }

    /// Distance between consecutive candle open times
    pub fn step_ms(&self) -> i64 {
        i64::from(self.count) * self.unit.millis()
    }

    /// Bucket granularity used for the candle labels of this timeframe
    pub fn granularity(&self) -> Granularity {
        Granularity::from_label(&self.unit.as_char().to_string())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.as_char())
    }
}

impl FromStr for Timeframe {
    type Err = KlineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Duration in hours of a timeframe token, `None` for unrecognised tokens
pub fn timeframe_hours(token: &str) -> Option<f64> {
    Timeframe::parse(token).ok().map(|tf| tf.hours())
}

/// First alphabetic run of a token ("15m" -> "m"), empty when there is none
pub fn granularity_label(token: &str) -> &str {
    let start = match token.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => idx,
        None => return "",
    };
    let rest = &token[start..];
    let len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    &rest[..len]
}
