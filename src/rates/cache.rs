//! Static exchange rate cache
//!
//! A table loaded once at startup and read-only afterwards. The CSV layout is
//! one row per date and one column per token/currency pair:
//!
//! ```text
//! date,hnt-usd,iot-usd
//! 2023-11-14,2.31,0.00041
//! 2023-11-15,2.40,
//! ```
//!
//! Empty, zero and negative cells count as missing. Older tables named their
//! columns `rate_<token>_<currency>`; those headers are accepted too.

use super::{normalize_code, pair_name, ExchangeRateSource, RateKey};
use crate::error::{Result, RewardsError};
use crate::ledger::{parse_decimal, raw_line};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use hashbrown::HashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Date format of the first cache column
pub const CACHE_DATE_FORMAT: &str = "%Y-%m-%d";

/// In-memory rate table: date -> (pair -> rate)
#[derive(Debug, Clone, Default)]
pub struct StaticRateCache {
    rates: BTreeMap<NaiveDate, HashMap<String, Decimal>>,
    pairs: BTreeSet<String>,
}

impl StaticRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache table from disk
    pub fn load_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RewardsError::UsageError(format!(
                "Unable to find rate cache at path: {}",
                path.display()
            )));
        }

        let cache = Self::load(File::open(path)?)?;
        log::info!(
            "Loaded {} rates for {} pairs over {} dates from {}",
            cache.num_entries(),
            cache.pairs.len(),
            cache.rates.len(),
            path.display()
        );
        Ok(cache)
    }

    /// Load a cache table from any CSV source
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let headers = rdr.headers()?.clone();
        let columns: Vec<String> = headers.iter().skip(1).map(column_pair).collect();
        if columns.is_empty() {
            return Err(RewardsError::ConfigError(
                "rate cache has no rate columns".to_string(),
            ));
        }

        let mut cache = Self::new();
        cache.pairs.extend(columns.iter().cloned());

        for result in rdr.records() {
            let row = result?;
            let line_number = row.position().map(|p| p.line()).unwrap_or_default();
            let fail = |reason: String| RewardsError::InputFormatError {
                line_number,
                line: raw_line(&text, &row).to_string(),
                reason,
            };

            let date = NaiveDate::parse_from_str(&row[0], CACHE_DATE_FORMAT)
                .map_err(|e| fail(format!("date: {}", e)))?;

            for (pair, cell) in columns.iter().zip(row.iter().skip(1)) {
                if cell.is_empty() {
                    continue;
                }
                let rate = parse_decimal(cell).map_err(|e| fail(format!("{}: {}", pair, e)))?;
                if rate <= Decimal::ZERO {
                    log::debug!("Ignoring non-positive {} rate on {}", pair, date);
                    continue;
                }
                cache.rates.entry(date).or_default().insert(pair.clone(), rate);
            }
        }

        Ok(cache)
    }

    /// Add one rate; rates must be positive
    pub fn insert(&mut self, key: &RateKey, rate: Decimal) -> Result<()> {
        if rate <= Decimal::ZERO {
            return Err(RewardsError::ConfigError(format!(
                "rate for {} must be positive, got {}",
                key, rate
            )));
        }

        let pair = key.pair();
        self.pairs.insert(pair.clone());
        self.rates.entry(key.date).or_default().insert(pair, rate);
        Ok(())
    }

    /// Exact lookup without error wrapping
    pub fn get(&self, key: &RateKey) -> Option<Decimal> {
        self.rates.get(&key.date)?.get(&key.pair()).copied()
    }

    /// Number of stored rates across all dates and pairs
    pub fn num_entries(&self) -> usize {
        self.rates.values().map(|row| row.len()).sum()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Write the table back out, dates ascending and pairs sorted
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = WriterBuilder::new().from_writer(writer);

        let mut header = vec!["date".to_string()];
        header.extend(self.pairs.iter().cloned());
        wtr.write_record(&header)?;

        for (date, row) in &self.rates {
            let mut record = vec![date.format(CACHE_DATE_FORMAT).to_string()];
            record.extend(
                self.pairs
                    .iter()
                    .map(|pair| row.get(pair).map(|r| r.normalize().to_string()).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }

    pub fn save_path(&self, path: &Path) -> Result<()> {
        self.write(File::create(path)?)
    }
}

impl ExchangeRateSource for StaticRateCache {
    fn rate(&self, token: &str, date: NaiveDate, currency: &str) -> Result<Decimal> {
        let key = RateKey::new(token, date, currency);
        self.get(&key).ok_or_else(|| key.missing())
    }

    fn name(&self) -> &str {
        "static-cache"
    }
}

/// Map a header cell to a pair name
///
/// `hnt-usd` stays as is; `rate_hnt_usd` and `HNT_USD` become `hnt-usd`.
fn column_pair(header: &str) -> String {
    let name = normalize_code(header);
    let name = name.strip_prefix("rate_").unwrap_or(&name);
    if name.contains('-') {
        return name.to_string();
    }
    match name.rsplit_once('_') {
        Some((token, currency)) => pair_name(token, currency),
        None => name.to_string(),
    }
}
