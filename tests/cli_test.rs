//! Command-line interface tests for hotspot-rewards
#![cfg(feature = "cli")]

use std::fs;
use std::process::Command;
use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_hotspot-rewards");

const LEDGER: &str = "hotspot_id,hotspot_name,token_type,interval_start_unix,interval_end_unix,amount\n\
                      H1,Alpha,hnt,1700000000,1700003600,10.0\n\
                      H1,Alpha,hnt,1700090000,1700093600,5.0\n";

#[test]
fn test_cli_help() {
    let output = Command::new(BIN).arg("-h").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-x"));
    assert!(stdout.contains("-p"));
}

#[test]
fn test_unpaired_flag_shows_usage_without_failing() {
    let output = Command::new(BIN).arg("-s").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
}

#[test]
fn test_missing_input_shows_usage() {
    let dir = tempdir().unwrap();
    let output = Command::new(BIN)
        .current_dir(dir.path())
        .args(["-f", "/dev/null", "-x", "rates.csv"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Input file not specified"));
}

#[test]
fn test_unknown_period_is_usage_error() {
    let dir = tempdir().unwrap();
    let output = Command::new(BIN)
        .current_dir(dir.path())
        .args(["-f", "/dev/null", "-i", "ledger.csv", "-p", "week"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("week"));
    assert!(!dir.path().join("output.csv").exists());
}

#[test]
fn test_full_run_with_rate_cache() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("ledger.csv"), LEDGER).unwrap();
    fs::write(
        dir.path().join("rates.csv"),
        "date,hnt-usd\n2023-11-14,2.0\n2023-11-16,2.0\n",
    )
    .unwrap();

    let output = Command::new(BIN)
        .current_dir(dir.path())
        .args([
            "-f", "/dev/null",
            "-s", "2023-11-01",
            "-e", "2023-11-30",
            "-i", "ledger.csv",
            "-o", "report.csv",
            "-p", "month",
            "-c", "usd",
            "-x", "rates.csv",
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = fs::read_to_string(dir.path().join("report.csv")).unwrap();
    assert_eq!(report, "entity_name,2023-11\nAlpha,30\n");
}

#[test]
fn test_missing_rate_exits_with_error_and_no_report() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("ledger.csv"), LEDGER).unwrap();
    fs::write(dir.path().join("rates.csv"), "date,hnt-usd\n2023-11-14,2.0\n").unwrap();

    let output = Command::new(BIN)
        .current_dir(dir.path())
        .args([
            "-f", "/dev/null",
            "-s", "2023-11-01",
            "-e", "2023-11-30",
            "-i", "ledger.csv",
            "-x", "rates.csv",
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Alpha (H1)"));
    assert!(!dir.path().join("output.csv").exists());
}
