//! # hotspot_rewards
//!
//! Converts per-hotspot reward ledgers into currency-normalized totals
//! bucketed by day, month or year.
//!
//! Data flows one way: ledger rows are parsed and filtered to a time window,
//! each record is priced through an [`ExchangeRateSource`], and converted
//! amounts are summed per entity and period into an [`AggregationTable`]
//! that is finally written out as CSV.
//!
//! ## Example
//!
//! ```rust
//! use hotspot_rewards::prelude::*;
//! use rust_decimal::Decimal;
//!
//! let ledger = "hotspot_id,hotspot_name,token_type,interval_start_unix,interval_end_unix,amount\n\
//!               H1,Alpha,hnt,1700000000,1700003600,10.0\n\
//!               H1,Alpha,hnt,1700090000,1700093600,5.0\n";
//! let rates = "date,hnt-usd\n2023-11-14,2.0\n2023-11-16,2.0\n";
//!
//! let start = chrono::NaiveDate::from_ymd_opt(2023, 11, 1).unwrap();
//! let end = chrono::NaiveDate::from_ymd_opt(2023, 11, 30).unwrap();
//! let window = TimeWindow::from_dates(start, end, chrono_tz::UTC).unwrap();
//!
//! let batch = LedgerReader::new(window).read(ledger.as_bytes()).unwrap();
//! let cache = StaticRateCache::load(rates.as_bytes()).unwrap();
//! let table = Aggregator::new(&cache, Period::Month, "usd")
//!     .aggregate(&batch.records)
//!     .unwrap();
//!
//! assert_eq!(table.get("H1").unwrap().total().unwrap(), Decimal::from(30));
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ledger;
pub mod period;
pub mod rates;
pub mod report;
pub mod types;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::aggregate::{AggregationTable, Aggregator, EntityTotals};
    pub use crate::config::{FileConfig, RateSourceConfig, RunConfig, RunOverrides};
    pub use crate::error::{Result, RewardsError};
    pub use crate::ledger::{LedgerBatch, LedgerReader};
    pub use crate::period::Period;
    pub use crate::rates::{ExchangeRateSource, RateKey, StaticRateCache};
    pub use crate::report::{write_report, write_report_path};
    pub use crate::types::{GroupBy, RewardRecord, TimeWindow};
}

pub use aggregate::{AggregationTable, Aggregator};
pub use error::{Result, RewardsError};
pub use rates::ExchangeRateSource;
