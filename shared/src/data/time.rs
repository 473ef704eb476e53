//! Calendar helpers: request windows and bucket labels

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::{KlineError, Result};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// How finely a timestamp is bucketed into its string label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Granularity {
    /// Map a unit label to a granularity. Unknown labels fall back to `Day`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "y" => Granularity::Year,
            "M" => Granularity::Month,
            "d" => Granularity::Day,
            "h" => Granularity::Hour,
            "m" => Granularity::Minute,
            "s" => Granularity::Second,
            _ => Granularity::Day,
        }
    }

    fn format(&self) -> &'static str {
        match self {
            Granularity::Year => "%Y",
            Granularity::Month => "%Y-%m",
            Granularity::Day => "%Y-%m-%d",
            Granularity::Hour => "%Y-%m-%d-%H",
            Granularity::Minute => "%Y-%m-%d-%H-%M",
            Granularity::Second => "%Y-%m-%d-%H-%M-%S",
        }
    }
}

/// Render an epoch timestamp as a UTC calendar label.
///
/// Ten-digit timestamps are taken as seconds, everything else as milliseconds.
/// Distinct timestamps inside the same bucket map to the same label.
pub fn bucket_label(timestamp: i64, granularity: Granularity) -> Result<String> {
    let millis = if timestamp.unsigned_abs().to_string().len() == 10 {
        timestamp * 1000
    } else {
        timestamp
    };

    let date = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or(KlineError::InvalidTimestamp(timestamp))?;

    Ok(date.format(granularity.format()).to_string())
}

/// Inverse of [`bucket_label`]: epoch milliseconds of the start of the bucket.
///
/// The granularity is inferred from the number of `-` separated fields.
pub fn parse_bucket_label(label: &str) -> Option<i64> {
    let fields = label
        .split('-')
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    let field = |idx: usize, default: u32| fields.get(idx).copied().unwrap_or(default);

    if fields.is_empty() || fields.len() > 6 {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(field(0, 1970) as i32, field(1, 1), field(2, 1))?;
    let time = NaiveTime::from_hms_opt(field(3, 0), field(4, 0), field(5, 0))?;

    Some(NaiveDateTime::new(date, time).and_utc().timestamp_millis())
}

/// Requested history range `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// Window covering `days` full UTC days, ending with the last completed day.
    ///
    /// The anchor is the UTC date of `now - 24h`; the still-forming current day is
    /// never included. `days = 0` is treated as 1.
    pub fn for_days(days: u32, now: DateTime<Utc>) -> Self {
        let days = i64::from(days.max(1));
        let anchor = (now - Duration::hours(24))
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp_millis();

        Self {
            start_ms: anchor - (days - 1) * DAY_MS,
            end_ms: anchor + DAY_MS,
        }
    }

    /// Window ending with yesterday, relative to the wall clock
    pub fn last_days(days: u32) -> Self {
        Self::for_days(days, Utc::now())
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start_ms && timestamp < self.end_ms
    }
}
