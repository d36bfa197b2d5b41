//! Core types shared by ingestion, rate resolution and aggregation

use crate::error::{Result, RewardsError};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// One ledger entry: tokens earned by a hotspot over an interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub entity_id: String,
    pub entity_name: String,
    /// Always lowercase
    pub token_type: String,
    pub interval_start: Timestamp,
    pub interval_end: Timestamp,
    pub amount: Decimal,
}

impl RewardRecord {
    /// Build a record, enforcing `interval_start <= interval_end` and `amount >= 0`
    pub fn new(
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        token_type: &str,
        interval_start: Timestamp,
        interval_end: Timestamp,
        amount: Decimal,
    ) -> std::result::Result<Self, String> {
        if interval_start > interval_end {
            return Err(format!(
                "interval_start {} is after interval_end {}",
                interval_start.timestamp(),
                interval_end.timestamp()
            ));
        }
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(format!("negative amount {}", amount));
        }

        Ok(Self {
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            token_type: token_type.trim().to_lowercase(),
            interval_start,
            interval_end,
            amount,
        })
    }

    /// Interval as `start..end` in unix seconds, for error messages
    pub fn interval_label(&self) -> String {
        format!(
            "{}..{}",
            self.interval_start.timestamp(),
            self.interval_end.timestamp()
        )
    }
}

/// Closed time window `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Window covering whole calendar days `start..=end` in `tz`
    pub fn from_dates(start: NaiveDate, end: NaiveDate, tz: Tz) -> Result<Self> {
        if start > end {
            return Err(RewardsError::UsageError(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }

        let next_day = end
            .succ_opt()
            .ok_or_else(|| RewardsError::UsageError(format!("end date {} out of range", end)))?;

        Ok(Self {
            start: start_of_day(start, tz)?,
            end: start_of_day(next_day, tz)? - Duration::seconds(1),
        })
    }

    /// A record is inside only if its whole interval is
    pub fn contains(&self, record: &RewardRecord) -> bool {
        record.interval_start >= self.start && record.interval_end <= self.end
    }
}

fn start_of_day(date: NaiveDate, tz: Tz) -> Result<Timestamp> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| RewardsError::UsageError(format!("invalid date {}", date)))?;

    // Midnight may not exist on DST transition days; take the earliest valid instant
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| RewardsError::UsageError(format!("no local midnight for {} in {}", date, tz.name())))
}

/// Which record field the aggregation table is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// Stable hotspot id; the first display name seen is carried alongside
    #[default]
    Id,
    /// Display name; hotspots sharing a name are merged
    Name,
}

impl GroupBy {
    /// Aggregation key for a record
    pub fn key<'a>(&self, record: &'a RewardRecord) -> &'a str {
        match self {
            GroupBy::Id => &record.entity_id,
            GroupBy::Name => &record.entity_name,
        }
    }
}

impl FromStr for GroupBy {
    type Err = RewardsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "id" => Ok(GroupBy::Id),
            "name" => Ok(GroupBy::Name),
            _ => Err(RewardsError::UsageError(format!(
                "unknown grouping '{}' (expected id or name)",
                s
            ))),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Id => write!(f, "id"),
            GroupBy::Name => write!(f, "name"),
        }
    }
}
