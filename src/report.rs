//! Tabular report output
//!
//! One header row (`entity_name` followed by every period label, ascending)
//! and one row per entity. Periods an entity never earned in are written as
//! `0`. Amounts use `.` as the decimal point regardless of locale.

use crate::aggregate::AggregationTable;
use crate::error::Result;
use csv::WriterBuilder;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// First header cell
pub const ENTITY_COLUMN: &str = "entity_name";

/// Canonical amount text: no trailing zeros, `0` for zero
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Header plus data rows for a table
pub fn render(table: &AggregationTable) -> Vec<Vec<String>> {
    let period = table.period();
    let keys = table.period_keys();
    let entities = table.entities();

    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for entity in &entities {
        *name_counts.entry(entity.name.as_str()).or_insert(0) += 1;
    }

    let mut rows = Vec::with_capacity(entities.len() + 1);

    let mut header = vec![ENTITY_COLUMN.to_string()];
    header.extend(keys.iter().map(|k| period.label(*k)));
    rows.push(header);

    for entity in entities {
        // Distinct hotspots sharing a display name get their key appended
        let label = if name_counts[entity.name.as_str()] > 1 && entity.key != entity.name {
            format!("{} ({})", entity.name, entity.key)
        } else {
            entity.name.clone()
        };

        let mut row = vec![label];
        row.extend(keys.iter().map(|k| format_amount(entity.amount(*k))));
        rows.push(row);
    }

    rows
}

/// Write the report as CSV
pub fn write_report<W: Write>(table: &AggregationTable, writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new().flexible(false).from_writer(writer);
    for row in render(table) {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the report to `path`, replacing it only once the file is complete
pub fn write_report_path(table: &AggregationTable, path: &Path) -> Result<()> {
    let partial = partial_path(path);

    let result = File::create(&partial)
        .map_err(Into::into)
        .and_then(|file| write_report(table, file))
        .and_then(|_| fs::rename(&partial, path).map_err(Into::into));

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    } else {
        log::info!(
            "Wrote {} rows x {} periods to {}",
            table.len(),
            table.period_keys().len(),
            path.display()
        );
    }
    result
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "report.csv".into());
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::period::Period;
    use crate::rates::FlatRateSource;
    use crate::types::RewardRecord;
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn record(id: &str, name: &str, end: i64, amount: Decimal) -> RewardRecord {
        RewardRecord::new(
            id,
            name,
            "hnt",
            DateTime::from_timestamp(end - 3600, 0).unwrap(),
            DateTime::from_timestamp(end, 0).unwrap(),
            amount,
        )
        .unwrap()
    }

    fn table(period: Period) -> AggregationTable {
        let records = vec![
            record("H1", "Alpha", 1_700_003_600, dec!(10.0)),
            record("H1", "Alpha", 1_700_093_600, dec!(5.0)),
            record("H2", "Beta", 1_700_003_600, dec!(0.125)),
        ];
        Aggregator::new(FlatRateSource::new(dec!(2.0)), period, "usd")
            .aggregate(&records)
            .unwrap()
    }

    fn to_string(table: &AggregationTable) -> String {
        let mut out = Vec::new();
        write_report(table, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_day_report_zero_fills() {
        assert_eq!(
            to_string(&table(Period::Day)),
            "entity_name,2023-11-14,2023-11-16\n\
             Alpha,20,10\n\
             Beta,0.25,0\n"
        );
    }

    #[test]
    fn test_month_and_year_labels() {
        assert_eq!(
            to_string(&table(Period::Month)),
            "entity_name,2023-11\nAlpha,30\nBeta,0.25\n"
        );
        assert_eq!(
            to_string(&table(Period::Year)),
            "entity_name,2023\nAlpha,30\nBeta,0.25\n"
        );
    }

    #[test]
    fn test_shared_names_are_disambiguated() {
        let records = vec![
            record("H1", "Twin", 1_700_003_600, dec!(1)),
            record("H2", "Twin", 1_700_003_600, dec!(2)),
        ];
        let table = Aggregator::new(FlatRateSource::new(dec!(1)), Period::Day, "usd")
            .aggregate(&records)
            .unwrap();

        let rows = render(&table);
        assert_eq!(rows[1][0], "Twin (H1)");
        assert_eq!(rows[2][0], "Twin (H2)");
    }

    #[test]
    fn test_empty_table_has_header_only() {
        let table = AggregationTable::new(Period::Day, "usd");
        assert_eq!(to_string(&table), "entity_name\n");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec!(0.000)), "0");
        assert_eq!(format_amount(dec!(12.500)), "12.5");
        assert_eq!(format_amount(dec!(1234567.89)), "1234567.89");
    }

    #[test]
    fn test_write_path_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output.csv");
        fs::write(&path, "stale").unwrap();

        write_report_path(&table(Period::Month), &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("entity_name,2023-11\n"));
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_write_path_missing_directory_leaves_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("output.csv");

        assert!(write_report_path(&table(Period::Day), &path).is_err());
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_failed_rename_removes_partial_file() {
        let dir = tempdir().unwrap();
        // A non-empty directory at the target makes the final rename fail
        let path = dir.path().join("output.csv");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        assert!(write_report_path(&table(Period::Day), &path).is_err());
        assert!(path.join("keep").exists());
        assert!(!partial_path(&path).exists());
    }
}
