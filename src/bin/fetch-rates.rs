//! fetch-rates - build or extend an exchange rate cache from CoinGecko
//!
//! Fetches one history point per token and day and writes the table that
//! `hotspot-rewards -x` reads, so report runs never depend on the live API.
//!
//! ```bash
//! fetch-rates -s 2023-01-01 -e 2023-12-31 -t hnt,iot,mobile -c usd,eur -o rates.csv
//! ```

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::Parser;
use colored::Colorize;
use hotspot_rewards::config::{parse_currency, parse_date, FileConfig};
use hotspot_rewards::rates::coingecko::{RetryPolicy, COINGECKO_BASE_URL, DEFAULT_BACKOFF};
use hotspot_rewards::rates::{normalize_code, CoinGeckoFetcher, RateKey, ReqwestTransport, StaticRateCache};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

/// fetch-rates: download daily token prices into a rate cache CSV
#[derive(Parser, Debug)]
#[command(name = "fetch-rates")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Download daily token prices into a rate cache CSV")]
struct Cli {
    /// First date [yyyy-MM-dd] (default: today)
    #[arg(short = 's', value_name = "DATE")]
    start: Option<String>,

    /// Last date [yyyy-MM-dd], inclusive (default: today)
    #[arg(short = 'e', value_name = "DATE")]
    end: Option<String>,

    /// Comma-separated token list
    #[arg(short = 't', value_name = "TOKENS", default_value = "hnt", value_delimiter = ',')]
    tokens: Vec<String>,

    /// Comma-separated currency list
    #[arg(short = 'c', value_name = "CODES", default_value = "usd", value_delimiter = ',')]
    currencies: Vec<String>,

    /// Cache file to write; existing rates in it are kept
    #[arg(short = 'o', value_name = "FILE", default_value = "rates.csv")]
    output: PathBuf,

    /// Configuration file (default: ~/.hotspot-rewards/config.toml)
    #[arg(short = 'f', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v')]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let file = FileConfig::load(cli.config.as_deref())?;
    let today = Local::now().date_naive();
    let start = cli.start.as_deref().map(parse_date).transpose()?.unwrap_or(today);
    let end = cli.end.as_deref().map(parse_date).transpose()?.unwrap_or(today);
    if start > end {
        bail!("start date {} is after end date {}", start, end);
    }

    let currencies = cli
        .currencies
        .iter()
        .map(|c| parse_currency(c))
        .collect::<Result<Vec<_>, _>>()?;
    let tokens: Vec<String> = cli.tokens.iter().map(|t| normalize_code(t)).collect();

    let mut cache = if cli.output.exists() {
        StaticRateCache::load_path(&cli.output)
            .with_context(|| format!("Failed to load existing cache {}", cli.output.display()))?
    } else {
        StaticRateCache::new()
    };

    let transport = ReqwestTransport::new(
        file.api_base_url
            .clone()
            .unwrap_or_else(|| COINGECKO_BASE_URL.to_string()),
        file.api_key.clone(),
    )?;
    let fetcher = CoinGeckoFetcher::new(transport)
        .with_policy(RetryPolicy {
            delay: file
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BACKOFF),
            max_retries: file.max_retries,
            ..RetryPolicy::default()
        })
        .with_token_ids(file.token_ids.clone());

    let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let pb = ProgressBar::new((dates.len() * tokens.len()) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?,
    );

    let mut stored = 0usize;
    let mut skipped = 0usize;

    for token in &tokens {
        for date in &dates {
            pb.set_message(format!("{} {}", token, date));

            for currency in &currencies {
                let key = RateKey::new(token, *date, currency);
                if cache.get(&key).is_some() {
                    skipped += 1;
                    continue;
                }

                match fetcher
                    .coin_history(token, *date, currency)
                    .with_context(|| format!("Failed to fetch {}", key))?
                {
                    Some(rate) if rate > rust_decimal::Decimal::ZERO => {
                        cache.insert(&key, rate)?;
                        stored += 1;
                    }
                    _ => log::warn!("No {} price listed for {}", currency, key),
                }
            }
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    cache
        .save_path(&cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    println!("{}", "Fetch Summary".green().bold());
    println!("{}", "=============".green());
    println!("Dates:     {} .. {}", start, end);
    println!("Stored:    {}", stored);
    println!("Cached:    {}", skipped);
    println!("Requests:  {}", fetcher.memo_len());
    println!("Output:    {}", cli.output.display().to_string().dimmed());

    Ok(())
}
