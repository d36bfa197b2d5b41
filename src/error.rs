//! Error types for hotspot reward aggregation

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for hotspot_rewards
#[derive(Error, Debug)]
pub enum RewardsError {
    #[error("Usage error: {0}")]
    UsageError(String),

    #[error("Unknown aggregation period: {0} (expected day, month or year)")]
    InvalidPeriod(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Malformed ledger row at line {line_number} ({reason}): {line}")]
    InputFormatError {
        line_number: u64,
        line: String,
        reason: String,
    },

    #[error("No exchange rate for {token}/{currency} on {date}")]
    MissingRate {
        token: String,
        currency: String,
        date: NaiveDate,
    },

    #[error("No usable exchange rate for entity {entity} ({token}/{currency} on {date}, interval {interval})")]
    RateUnavailable {
        entity: String,
        token: String,
        currency: String,
        date: NaiveDate,
        interval: String,
    },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Amount overflow for entity {entity}: {detail}")]
    ArithmeticOverflow { entity: String, detail: String },

    #[error("Rate limited by price API, gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Rate lookup cancelled by shutdown request")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl RewardsError {
    /// Errors that should print usage instead of a failure report
    ///
    /// Everything else is fatal and exits non-zero.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            RewardsError::UsageError(_) | RewardsError::InvalidPeriod(_) | RewardsError::ConfigError(_)
        )
    }
}

/// Result type alias for hotspot_rewards operations
pub type Result<T> = std::result::Result<T, RewardsError>;
