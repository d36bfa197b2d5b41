//! Reward ledger ingestion
//!
//! Reads the hotspot ledger CSV:
//!
//! ```text
//! hotspot_id,hotspot_name,token_type,interval_start_unix,interval_end_unix,amount
//! H1,Alpha,hnt,1700000000,1700003600,10.0
//! ```
//!
//! Rows with the wrong number of columns are skipped with a warning. Rows
//! with the right shape but an unparsable field abort the whole read, and
//! the error carries the offending line verbatim.

use crate::error::{Result, RewardsError};
use crate::types::{RewardRecord, TimeWindow, Timestamp};
use chrono::DateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Number of columns in a ledger row
pub const LEDGER_COLUMNS: usize = 6;

/// Counters from one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows: usize,
    pub accepted: usize,
    pub skipped_shape: usize,
    pub outside_window: usize,
}

/// Records accepted by the reader plus its counters
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    pub records: Vec<RewardRecord>,
    pub stats: IngestStats,
}

/// Parses ledger rows and keeps those whose interval lies inside a window
#[derive(Debug, Clone)]
pub struct LedgerReader {
    window: TimeWindow,
}

impl LedgerReader {
    pub fn new(window: TimeWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Read a ledger file from disk
    pub fn read_path(&self, path: &Path) -> Result<LedgerBatch> {
        if !path.exists() {
            return Err(RewardsError::UsageError(format!(
                "Unable to find file at path: {}",
                path.display()
            )));
        }

        let file = File::open(path)?;
        let batch = self.read(file)?;

        log::info!(
            "Read {} ledger rows from {}: {} accepted, {} malformed rows skipped, {} outside window",
            batch.stats.rows,
            path.display(),
            batch.stats.accepted,
            batch.stats.skipped_shape,
            batch.stats.outside_window
        );

        Ok(batch)
    }

    /// Read a ledger from any source; the first row is a header
    pub fn read<R: Read>(&self, mut reader: R) -> Result<LedgerBatch> {
        // Kept whole so error messages can quote the input line as written
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let mut batch = LedgerBatch::default();

        for result in rdr.records() {
            let row = result?;
            let line_number = row.position().map(|p| p.line()).unwrap_or_default();
            batch.stats.rows += 1;

            if row.len() != LEDGER_COLUMNS {
                log::warn!(
                    "Skipping ledger line {}: expected {} columns, got {}",
                    line_number,
                    LEDGER_COLUMNS,
                    row.len()
                );
                batch.stats.skipped_shape += 1;
                continue;
            }

            let record = parse_row(&row, line_number, raw_line(&text, &row))?;

            if self.window.contains(&record) {
                batch.records.push(record);
                batch.stats.accepted += 1;
            } else {
                batch.stats.outside_window += 1;
            }
        }

        Ok(batch)
    }
}

/// Parse a six-column row into a record; `raw` is echoed on failure
pub fn parse_row(row: &StringRecord, line_number: u64, raw: &str) -> Result<RewardRecord> {
    let fail = |reason: String| RewardsError::InputFormatError {
        line_number,
        line: raw.to_string(),
        reason,
    };

    let start = parse_unix(&row[3]).map_err(|e| fail(format!("interval_start: {}", e)))?;
    let end = parse_unix(&row[4]).map_err(|e| fail(format!("interval_end: {}", e)))?;
    let amount = parse_decimal(&row[5]).map_err(|e| fail(format!("amount: {}", e)))?;

    RewardRecord::new(&row[0], &row[1], &row[2], start, end, amount).map_err(fail)
}

/// Source text of the line a record starts on, without its terminator
pub(crate) fn raw_line<'a>(text: &'a str, row: &StringRecord) -> &'a str {
    let start = row.position().map(|p| p.byte() as usize).unwrap_or_default();
    text.get(start..)
        .and_then(|rest| rest.lines().next())
        .unwrap_or_default()
}

fn parse_unix(field: &str) -> std::result::Result<Timestamp, String> {
    let secs: i64 = field
        .parse()
        .map_err(|_| format!("'{}' is not a unix timestamp", field))?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| format!("'{}' is out of range", field))
}

/// Locale-independent decimal parse; `.` is the only decimal separator
pub fn parse_decimal(field: &str) -> std::result::Result<Decimal, String> {
    let parsed = if field.contains(['e', 'E']) {
        Decimal::from_scientific(field)
    } else {
        Decimal::from_str(field)
    };
    parsed.map_err(|_| format!("'{}' is not a decimal number", field))
}
