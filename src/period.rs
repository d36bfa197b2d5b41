//! Reporting periods and calendar truncation

use crate::error::{Result, RewardsError};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// One bucket per calendar day
    Day,
    /// One bucket per calendar month, keyed on the 1st
    Month,
    /// One bucket per calendar year, keyed on January 1st
    Year,
}

impl Period {
    /// Truncate a date to the first day of its bucket
    ///
    /// Idempotent: `p.truncate(p.truncate(d)) == p.truncate(d)`.
    pub fn truncate(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => date,
            Period::Month => date.with_day(1).unwrap_or(date),
            Period::Year => date.with_day(1).and_then(|d| d.with_month(1)).unwrap_or(date),
        }
    }

    /// Bucket key for an instant, using its calendar date in `tz`
    pub fn key_for(&self, instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
        self.truncate(instant.with_timezone(&tz).date_naive())
    }

    /// Column label for a bucket key
    pub fn label(&self, key: NaiveDate) -> String {
        match self {
            Period::Day => key.format("%Y-%m-%d").to_string(),
            Period::Month => key.format("%Y-%m").to_string(),
            Period::Year => key.format("%Y").to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Month => "month",
            Period::Year => "year",
        }
    }
}

impl FromStr for Period {
    type Err = RewardsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Period::Day),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            _ => Err(RewardsError::InvalidPeriod(s.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
