//! hotspot-rewards CLI - fiat value of hotspot rewards per period
//!
//! ## Example Usage
//!
//! ```bash
//! # November totals in EUR from a pre-built rate table
//! hotspot-rewards -s 2023-11-01 -e 2023-11-30 -i ledger.csv -o november.csv \
//!     -p month -c eur -x rates.csv
//!
//! # Daily totals with rates fetched live from CoinGecko
//! RUST_LOG=debug hotspot-rewards -s 2023-11-01 -e 2023-11-07 -i ledger.csv
//! ```

use chrono::Local;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use colored::Colorize;
use hotspot_rewards::config::{FileConfig, RateSourceConfig, RunConfig, RunOverrides};
use hotspot_rewards::error::{Result, RewardsError};
use hotspot_rewards::ledger::LedgerReader;
use hotspot_rewards::rates::{ExchangeRateSource, StaticRateCache};
use hotspot_rewards::report::{format_amount, write_report_path};
use hotspot_rewards::Aggregator;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;

/// hotspot-rewards: convert hotspot reward ledgers into fiat totals
#[derive(Parser, Debug)]
#[command(name = "hotspot-rewards")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Convert hotspot reward ledgers into fiat totals per day, month or year")]
#[command(after_help = "Rewards are priced with the exchange rate of the day each interval ends.")]
struct Cli {
    /// Start date [yyyy-MM-dd], inclusive (default: today)
    #[arg(short = 's', value_name = "DATE")]
    start: Option<String>,

    /// End date [yyyy-MM-dd], inclusive (default: today)
    #[arg(short = 'e', value_name = "DATE")]
    end: Option<String>,

    /// Input ledger CSV
    #[arg(short = 'i', value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output report CSV (default: output.csv)
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Aggregation period: day, month or year (default: day)
    #[arg(short = 'p', value_name = "PERIOD")]
    period: Option<String>,

    /// Target currency code (default: usd)
    #[arg(short = 'c', value_name = "CODE")]
    currency: Option<String>,

    /// Exchange rate cache CSV; rates are fetched live when omitted
    #[arg(short = 'x', value_name = "FILE")]
    rate_cache: Option<PathBuf>,

    /// Timezone for window bounds and period keys (default: UTC)
    #[arg(short = 'z', value_name = "TZ")]
    timezone: Option<String>,

    /// Aggregate by hotspot id or display name (default: id)
    #[arg(short = 'g', value_name = "KEY")]
    group_by: Option<String>,

    /// Configuration file (default: ~/.hotspot-rewards/config.toml)
    #[arg(short = 'f', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v')]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            start: self.start.clone(),
            end: self.end.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            period: self.period.clone(),
            currency: self.currency.clone(),
            rate_cache: self.rate_cache.clone(),
            timezone: self.timezone.clone(),
            group_by: self.group_by.clone(),
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprintln!("Could not parse args ({:?}). Valid format is:", e.kind());
            show_help();
            return;
        }
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(&cli) {
        Ok(()) => {}
        Err(e) if e.is_usage() => {
            eprintln!("{} {}", "Warning:".yellow(), e);
            show_help();
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            eprintln!("{}", "No report was written.".dimmed());
            process::exit(1);
        }
    }
}

fn show_help() {
    let _ = Cli::command().print_help();
    println!();
}

fn run(cli: &Cli) -> Result<()> {
    let file = FileConfig::load(cli.config.as_deref())?;
    let config = RunConfig::resolve(file, cli.overrides(), Local::now().date_naive())?;

    if cli.verbose {
        println!(
            "{} v{}",
            "hotspot-rewards".cyan().bold(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "Window: {} .. {} ({}), period: {}, currency: {}",
            config.start, config.end, config.timezone.name(), config.period, config.currency
        );
    }

    let batch = LedgerReader::new(config.window).read_path(&config.input)?;
    let live = matches!(config.rate_source, RateSourceConfig::Live(_));
    let source = build_source(&config.rate_source)?;

    let aggregator = Aggregator::new(source, config.period, &config.currency)
        .with_group_by(config.group_by)
        .with_timezone(config.timezone);

    if live {
        let keys = aggregator.rate_keys(&batch.records).len();
        let pb = ProgressBar::new(keys as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| RewardsError::ConfigError(format!("progress template: {}", e)))?,
        );
        let fetched = aggregator.prefetch(&batch.records, |key| {
            pb.set_message(key.to_string());
            pb.inc(1);
        });
        pb.finish_and_clear();
        fetched?;
    }

    let table = aggregator.aggregate(&batch.records)?;
    let grand_total = table.grand_total()?;
    write_report_path(&table, &config.output)?;

    println!("{}", "Report Summary".green().bold());
    println!("{}", "==============".green());
    println!("Records:   {}", batch.records.len());
    println!("Entities:  {}", table.len());
    println!("Periods:   {}", table.period_keys().len());
    println!(
        "Total:     {} {}",
        format_amount(grand_total),
        table.currency().to_uppercase()
    );
    println!("Output:    {}", config.output.display().to_string().dimmed());

    Ok(())
}

fn build_source(rate_source: &RateSourceConfig) -> Result<Box<dyn ExchangeRateSource>> {
    match rate_source {
        RateSourceConfig::Cache(path) => Ok(Box::new(StaticRateCache::load_path(path)?)),
        RateSourceConfig::Live(live) => build_live_source(live),
    }
}

#[cfg(feature = "live")]
fn build_live_source(
    live: &hotspot_rewards::config::LiveConfig,
) -> Result<Box<dyn ExchangeRateSource>> {
    use hotspot_rewards::rates::{CoinGeckoFetcher, ReqwestTransport};

    let transport = ReqwestTransport::new(live.base_url.clone(), live.api_key.clone())?;
    let fetcher = CoinGeckoFetcher::new(transport)
        .with_policy(live.policy.clone())
        .with_token_ids(live.token_ids.clone());
    Ok(Box::new(fetcher))
}

#[cfg(not(feature = "live"))]
fn build_live_source(
    _live: &hotspot_rewards::config::LiveConfig,
) -> Result<Box<dyn ExchangeRateSource>> {
    Err(RewardsError::UsageError(
        "No rate cache given (-x) and live fetching is not compiled in".to_string(),
    ))
}
