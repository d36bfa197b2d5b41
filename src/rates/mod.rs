//! Exchange rate sources
//!
//! Resolves a `(token, date, currency)` triple to a decimal rate such that
//! `currency_amount = token_amount * rate`.
//!
//! # Components
//!
//! - **cache**: table loaded once from a CSV file, pure in-memory lookups
//! - **coingecko**: live price-history fetcher with backoff on HTTP 429
//!
//! Only one source is active per run. It is passed to the aggregator
//! explicitly rather than living in global state.

pub mod cache;
pub mod coingecko;

pub use cache::StaticRateCache;
pub use coingecko::{CoinGeckoFetcher, HistoryReply, HistoryTransport, RetryPolicy};
#[cfg(feature = "live")]
pub use coingecko::ReqwestTransport;

use crate::error::{Result, RewardsError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;

/// Lowercased, trimmed token or currency code
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Lookup key for one priced point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey {
    pub token: String,
    pub currency: String,
    pub date: NaiveDate,
}

impl RateKey {
    pub fn new(token: &str, date: NaiveDate, currency: &str) -> Self {
        Self {
            token: normalize_code(token),
            currency: normalize_code(currency),
            date,
        }
    }

    /// Cache column name, e.g. `hnt-usd`
    pub fn pair(&self) -> String {
        pair_name(&self.token, &self.currency)
    }

    pub fn missing(&self) -> RewardsError {
        RewardsError::MissingRate {
            token: self.token.clone(),
            currency: self.currency.clone(),
            date: self.date,
        }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} on {}", self.token, self.currency, self.date)
    }
}

/// `"{token}-{currency}"`, lowercased
pub fn pair_name(token: &str, currency: &str) -> String {
    format!("{}-{}", normalize_code(token), normalize_code(currency))
}

/// Trait for resolving exchange rates
pub trait ExchangeRateSource: Send + Sync {
    /// Rate for `token` in `currency` on `date`
    ///
    /// Fails with [`RewardsError::MissingRate`] when no rate is known.
    fn rate(&self, token: &str, date: NaiveDate, currency: &str) -> Result<Decimal>;

    /// Short name for log output
    fn name(&self) -> &str;
}

impl<S: ExchangeRateSource + ?Sized> ExchangeRateSource for &S {
    fn rate(&self, token: &str, date: NaiveDate, currency: &str) -> Result<Decimal> {
        (**self).rate(token, date, currency)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<S: ExchangeRateSource + ?Sized> ExchangeRateSource for Box<S> {
    fn rate(&self, token: &str, date: NaiveDate, currency: &str) -> Result<Decimal> {
        (**self).rate(token, date, currency)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Same rate for every token, date and currency
///
/// Useful in tests and benchmarks where pricing is not under test.
#[derive(Debug, Clone, Copy)]
pub struct FlatRateSource {
    rate: Decimal,
}

impl FlatRateSource {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

impl ExchangeRateSource for FlatRateSource {
    fn rate(&self, _token: &str, _date: NaiveDate, _currency: &str) -> Result<Decimal> {
        Ok(self.rate)
    }

    fn name(&self) -> &str {
        "flat"
    }
}
