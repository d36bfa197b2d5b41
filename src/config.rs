//! Run configuration
//!
//! Settings are resolved in three layers: built-in defaults, then an
//! optional TOML file, then command-line flags. Everything is validated
//! here, before any ledger row is read.
//!
//! ```toml
//! currency = "eur"
//! period = "month"
//! timezone = "Europe/Berlin"
//! rate_cache = "rates.csv"
//! backoff_secs = 10
//!
//! [token_ids]
//! hnt = "helium"
//! ```

use crate::error::{Result, RewardsError};
use crate::period::Period;
use crate::rates::coingecko::{RetryPolicy, COINGECKO_BASE_URL, DEFAULT_BACKOFF};
use crate::rates::normalize_code;
use crate::types::{GroupBy, TimeWindow};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_OUTPUT: &str = "output.csv";
pub const DEFAULT_PERIOD: Period = Period::Day;
pub const DEFAULT_CURRENCY: &str = "usd";

/// Accepted spellings for `-s` and `-e`
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m-%d-%Y"];

/// Contents of the optional TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub output: Option<PathBuf>,
    pub period: Option<String>,
    pub currency: Option<String>,
    pub timezone: Option<String>,
    pub group_by: Option<String>,
    pub rate_cache: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub backoff_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub token_ids: BTreeMap<String, String>,
}

impl FileConfig {
    /// `~/.hotspot-rewards/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".hotspot-rewards").join("config.toml"))
    }

    /// Load `path`, or the default location when `path` is `None`
    ///
    /// A missing default file yields empty settings; a missing or
    /// unparsable explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            RewardsError::ConfigError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&contents)
            .map_err(|e| RewardsError::ConfigError(format!("{}: {}", path.display(), e)))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, String> {
        toml::from_str(contents).map_err(|e| format!("Failed to parse config: {}", e))
    }
}

/// Flags given on the command line; `None` defers to the lower layers
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub start: Option<String>,
    pub end: Option<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub period: Option<String>,
    pub currency: Option<String>,
    pub rate_cache: Option<PathBuf>,
    pub timezone: Option<String>,
    pub group_by: Option<String>,
}

/// Live fetcher settings
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub policy: RetryPolicy,
    pub token_ids: BTreeMap<String, String>,
}

/// The one rate strategy active for a run
#[derive(Debug, Clone)]
pub enum RateSourceConfig {
    Cache(PathBuf),
    Live(LiveConfig),
}

/// Fully resolved settings for one pipeline run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub window: TimeWindow,
    pub input: PathBuf,
    pub output: PathBuf,
    pub period: Period,
    pub currency: String,
    pub timezone: Tz,
    pub group_by: GroupBy,
    pub rate_source: RateSourceConfig,
}

impl RunConfig {
    /// Merge the layers; `today` is the default for both window bounds
    pub fn resolve(file: FileConfig, cli: RunOverrides, today: NaiveDate) -> Result<Self> {
        let period = match cli.period.or(file.period) {
            Some(p) => p.parse()?,
            None => DEFAULT_PERIOD,
        };

        let timezone = match cli.timezone.or(file.timezone) {
            Some(tz) => parse_timezone(&tz)?,
            None => chrono_tz::UTC,
        };

        let group_by = match cli.group_by.or(file.group_by) {
            Some(g) => g.parse()?,
            None => GroupBy::default(),
        };

        let currency = parse_currency(
            cli.currency
                .or(file.currency)
                .as_deref()
                .unwrap_or(DEFAULT_CURRENCY),
        )?;

        let start = cli.start.as_deref().map(parse_date).transpose()?.unwrap_or(today);
        let end = cli.end.as_deref().map(parse_date).transpose()?.unwrap_or(today);
        let window = TimeWindow::from_dates(start, end, timezone)?;

        let input = cli
            .input
            .ok_or_else(|| RewardsError::UsageError("Input file not specified.".to_string()))?;
        let output = cli
            .output
            .or(file.output)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let rate_source = match cli.rate_cache.or(file.rate_cache) {
            Some(path) => RateSourceConfig::Cache(path),
            None => RateSourceConfig::Live(LiveConfig {
                base_url: file
                    .api_base_url
                    .unwrap_or_else(|| COINGECKO_BASE_URL.to_string()),
                api_key: file.api_key,
                policy: RetryPolicy {
                    delay: file
                        .backoff_secs
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_BACKOFF),
                    max_retries: file.max_retries,
                    ..RetryPolicy::default()
                },
                token_ids: file.token_ids,
            }),
        };

        Ok(Self {
            start,
            end,
            window,
            input,
            output,
            period,
            currency,
            timezone,
            group_by,
            rate_source,
        })
    }
}

/// Calendar date in `yyyy-MM-dd` (or legacy `MM-dd-yyyy`) form
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or_else(|| RewardsError::UsageError(format!("Invalid date '{}', expected yyyy-MM-dd", s)))
}

pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.trim()
        .parse::<Tz>()
        .map_err(|_| RewardsError::UsageError(format!("Unknown timezone '{}'", s)))
}

/// Lowercased currency code; letters and digits only
pub fn parse_currency(s: &str) -> Result<String> {
    let code = normalize_code(s);
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RewardsError::UsageError(format!("Invalid currency code '{}'", s)));
    }
    Ok(code)
}
