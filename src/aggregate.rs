//! Currency conversion and period bucketing of reward records
//!
//! Each record is priced with the rate for its token on the calendar date
//! of `interval_end`, converted to the target currency and added to the
//! bucket `period.truncate(date)` of its entity. Addition is commutative,
//! so record order never changes the totals.
//!
//! A single record without a usable rate fails the whole aggregation;
//! partial reports are never produced.

use crate::error::{Result, RewardsError};
use crate::period::Period;
use crate::rates::{normalize_code, ExchangeRateSource, RateKey};
use crate::types::{GroupBy, RewardRecord};
use chrono::NaiveDate;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Converted totals for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTotals {
    /// Aggregation key (hotspot id or display name)
    pub key: String,
    /// Display name of the first record seen for this key
    pub name: String,
    /// Hotspot ids that contributed
    pub ids: BTreeSet<String>,
    /// Period key -> total in the target currency
    pub buckets: BTreeMap<NaiveDate, Decimal>,
}

impl EntityTotals {
    fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            ids: BTreeSet::new(),
            buckets: BTreeMap::new(),
        }
    }

    /// Bucket total, zero when nothing landed there
    pub fn amount(&self, period_key: NaiveDate) -> Decimal {
        self.buckets.get(&period_key).copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum over all buckets
    pub fn total(&self) -> Result<Decimal> {
        self.buckets.values().try_fold(Decimal::ZERO, |acc, value| {
            acc.checked_add(*value).ok_or_else(|| RewardsError::ArithmeticOverflow {
                entity: self.label(),
                detail: format!("total {} + {}", acc, value),
            })
        })
    }

    /// `Name (key)` as used in error messages
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.key)
    }
}

/// Entity x period matrix of converted totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationTable {
    period: Period,
    currency: String,
    entities: BTreeMap<String, EntityTotals>,
}

impl AggregationTable {
    pub fn new(period: Period, currency: &str) -> Self {
        Self {
            period,
            currency: normalize_code(currency),
            entities: BTreeMap::new(),
        }
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Add a converted amount; buckets start at zero
    pub fn add(
        &mut self,
        record: &RewardRecord,
        key: &str,
        period_key: NaiveDate,
        value: Decimal,
    ) -> Result<()> {
        let entity = self
            .entities
            .entry(key.to_string())
            .or_insert_with(|| EntityTotals::new(key, &record.entity_name));
        entity.ids.insert(record.entity_id.clone());

        let bucket = entity.buckets.entry(period_key).or_insert(Decimal::ZERO);
        let current = *bucket;
        *bucket = current
            .checked_add(value)
            .ok_or_else(|| RewardsError::ArithmeticOverflow {
                entity: format!("{} ({})", record.entity_name, record.entity_id),
                detail: format!("bucket {} total {} + {}", period_key, current, value),
            })?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&EntityTotals> {
        self.entities.get(key)
    }

    /// Entities ordered by display name, then key
    pub fn entities(&self) -> Vec<&EntityTotals> {
        let mut entities: Vec<&EntityTotals> = self.entities.values().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
        entities
    }

    /// Union of period keys across all entities, ascending
    pub fn period_keys(&self) -> BTreeSet<NaiveDate> {
        self.entities
            .values()
            .flat_map(|e| e.buckets.keys().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Sum over every entity and bucket
    pub fn grand_total(&self) -> Result<Decimal> {
        self.entities.values().try_fold(Decimal::ZERO, |acc, entity| {
            let total = entity.total()?;
            acc.checked_add(total).ok_or_else(|| RewardsError::ArithmeticOverflow {
                entity: "all entities".to_string(),
                detail: format!("grand total {} + {}", acc, total),
            })
        })
    }
}

/// Prices and buckets reward records
pub struct Aggregator<S: ExchangeRateSource> {
    source: S,
    period: Period,
    currency: String,
    group_by: GroupBy,
    timezone: Tz,
}

impl<S: ExchangeRateSource> Aggregator<S> {
    pub fn new(source: S, period: Period, currency: &str) -> Self {
        Self {
            source,
            period,
            currency: normalize_code(currency),
            group_by: GroupBy::default(),
            timezone: chrono_tz::UTC,
        }
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    /// Zone whose calendar dates define rate dates and period keys
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Calendar date used to price a record
    pub fn rate_date(&self, record: &RewardRecord) -> NaiveDate {
        record.interval_end.with_timezone(&self.timezone).date_naive()
    }

    /// Distinct rate lookups needed for `records`
    pub fn rate_keys(&self, records: &[RewardRecord]) -> BTreeSet<RateKey> {
        records
            .iter()
            .map(|r| RateKey::new(&r.token_type, self.rate_date(r), &self.currency))
            .collect()
    }

    /// Resolve every distinct rate once before aggregating
    ///
    /// Missing rates are left for [`Aggregator::aggregate`] to report with
    /// the entity that needs them; any other failure stops the prefetch.
    pub fn prefetch<F>(&self, records: &[RewardRecord], mut progress: F) -> Result<usize>
    where
        F: FnMut(&RateKey),
    {
        let keys = self.rate_keys(records);
        for key in &keys {
            match self.source.rate(&key.token, key.date, &key.currency) {
                Ok(_) | Err(RewardsError::MissingRate { .. }) => progress(key),
                Err(e) => return Err(e),
            }
        }
        Ok(keys.len())
    }

    /// Build the aggregation table; fails on the first unusable rate
    pub fn aggregate(&self, records: &[RewardRecord]) -> Result<AggregationTable> {
        let mut table = AggregationTable::new(self.period, &self.currency);

        for record in records {
            let value = self.convert(record)?;
            let period_key = self.period.truncate(self.rate_date(record));
            table.add(record, self.group_by.key(record), period_key, value)?;
        }

        self.warn_on_shared_names(records);
        log::info!(
            "Aggregated {} records into {} entities and {} {} buckets via {}",
            records.len(),
            table.len(),
            table.period_keys().len(),
            self.period,
            self.source.name()
        );

        Ok(table)
    }

    /// `amount * rate` for one record
    pub fn convert(&self, record: &RewardRecord) -> Result<Decimal> {
        let date = self.rate_date(record);
        let unavailable = || RewardsError::RateUnavailable {
            entity: format!("{} ({})", record.entity_name, record.entity_id),
            token: record.token_type.clone(),
            currency: self.currency.clone(),
            date,
            interval: record.interval_label(),
        };

        let rate = match self.source.rate(&record.token_type, date, &self.currency) {
            Ok(rate) => rate,
            Err(RewardsError::MissingRate { .. }) => return Err(unavailable()),
            Err(e) => return Err(e),
        };
        if rate <= Decimal::ZERO {
            return Err(unavailable());
        }

        record
            .amount
            .checked_mul(rate)
            .ok_or_else(|| RewardsError::ArithmeticOverflow {
                entity: format!("{} ({})", record.entity_name, record.entity_id),
                detail: format!("amount {} x rate {}", record.amount, rate),
            })
    }

    fn warn_on_shared_names(&self, records: &[RewardRecord]) {
        let mut ids_by_name: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for record in records {
            ids_by_name
                .entry(record.entity_name.as_str())
                .or_default()
                .insert(record.entity_id.as_str());
        }

        for (name, ids) in ids_by_name.iter().filter(|(_, ids)| ids.len() > 1) {
            match self.group_by {
                GroupBy::Id => log::warn!(
                    "Display name '{}' is shared by {} hotspots; they are reported separately",
                    name,
                    ids.len()
                ),
                GroupBy::Name => log::warn!(
                    "Display name '{}' merges {} distinct hotspots: {:?}",
                    name,
                    ids.len(),
                    ids
                ),
            }
        }
    }
}
