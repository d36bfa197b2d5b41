//! Live exchange rates from the CoinGecko price-history API
//!
//! `GET {base}/coins/{coin_id}/history?date=dd-mm-yyyy` returns a JSON body
//! whose `market_data.current_price` maps currency codes to prices. The API
//! is rate limited: HTTP 429 makes the fetcher sleep a fixed delay and retry
//! the identical request. Every other failure is returned immediately.
//!
//! Retries run in a loop, so sustained throttling never grows the stack.
//! Results are memoized per `(coin, date)`, so a run asks the API at most
//! once for each distinct date.

use super::{normalize_code, ExchangeRateSource, RateKey};
use crate::error::{Result, RewardsError};
use chrono::NaiveDate;
use hashbrown::HashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Public API base URL
pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Delay before retrying a rate-limited request
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Date format of the `date` query parameter
pub const HISTORY_DATE_FORMAT: &str = "%d-%m-%Y";

/// Token to CoinGecko coin id, for tokens whose id differs from the ticker
pub const DEFAULT_TOKEN_IDS: &[(&str, &str)] = &[
    ("hnt", "helium"),
    ("iot", "helium-iot"),
    ("mobile", "helium-mobile"),
];

/// Outcome of one history request
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryReply {
    /// `current_price` map, keyed by lowercase currency code
    Prices(HashMap<String, Decimal>),
    /// HTTP 429
    TooManyRequests,
}

/// One round trip to the price-history endpoint
pub trait HistoryTransport: Send + Sync {
    fn fetch_history(&self, coin_id: &str, date: NaiveDate) -> Result<HistoryReply>;
}

/// How the fetcher backs off on HTTP 429
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries until the request succeeds or shutdown is requested
    pub max_retries: Option<u32>,
    /// Sleep slice between shutdown checks
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_BACKOFF,
            max_retries: None,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Live rate source backed by a [`HistoryTransport`]
pub struct CoinGeckoFetcher<T: HistoryTransport> {
    transport: T,
    token_ids: HashMap<String, String>,
    policy: RetryPolicy,
    shutdown: Arc<AtomicBool>,
    memo: RwLock<HashMap<(String, NaiveDate), HashMap<String, Decimal>>>,
}

impl<T: HistoryTransport> CoinGeckoFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            token_ids: DEFAULT_TOKEN_IDS
                .iter()
                .map(|(token, id)| (token.to_string(), id.to_string()))
                .collect(),
            policy: RetryPolicy::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add or override token to coin id mappings
    pub fn with_token_ids<I, K, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (token, id) in ids {
            self.token_ids.insert(normalize_code(token.as_ref()), id.into());
        }
        self
    }

    /// Flag checked during backoff; setting it aborts the wait
    ///
    /// For library embedders that own a shutdown signal. The bundled
    /// binaries leave it unset, so Ctrl-C ends them outright; the report
    /// is only ever renamed into place once complete.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// CoinGecko id for a token; unmapped tokens are sent as is
    pub fn coin_id(&self, token: &str) -> String {
        let token = normalize_code(token);
        self.token_ids.get(&token).cloned().unwrap_or(token)
    }

    /// Price of `token` in `currency` on `date`
    ///
    /// `Ok(None)` means the API answered but did not list the currency.
    pub fn coin_history(&self, token: &str, date: NaiveDate, currency: &str) -> Result<Option<Decimal>> {
        let coin_id = self.coin_id(token);
        let currency = normalize_code(currency);
        let memo_key = (coin_id, date);

        if let Some(prices) = self.read_memo().get(&memo_key) {
            log::debug!("Memo hit for {} on {}", memo_key.0, date);
            return Ok(prices.get(&currency).copied());
        }

        let prices = self.fetch_with_backoff(&memo_key.0, date)?;
        let rate = prices.get(&currency).copied();

        self.memo
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(memo_key, prices);

        Ok(rate)
    }

    /// Number of distinct `(coin, date)` responses held
    pub fn memo_len(&self) -> usize {
        self.read_memo().len()
    }

    fn read_memo(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<(String, NaiveDate), HashMap<String, Decimal>>> {
        self.memo.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fetch_with_backoff(&self, coin_id: &str, date: NaiveDate) -> Result<HashMap<String, Decimal>> {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.transport.fetch_history(coin_id, date)? {
                HistoryReply::Prices(prices) => return Ok(prices),
                HistoryReply::TooManyRequests => {
                    if let Some(max) = self.policy.max_retries {
                        if attempts > max {
                            return Err(RewardsError::RateLimited { attempts });
                        }
                    }
                    log::warn!(
                        "CoinGecko TooManyRequests for {} on {} (attempt {}). Sleeping {:?}",
                        coin_id,
                        date,
                        attempts,
                        self.policy.delay
                    );
                    self.backoff()?;
                }
            }
        }
    }

    fn backoff(&self) -> Result<()> {
        let deadline = Instant::now() + self.policy.delay;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(RewardsError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(self.policy.poll_interval.min(deadline - now));
        }
    }
}

impl<T: HistoryTransport> ExchangeRateSource for CoinGeckoFetcher<T> {
    fn rate(&self, token: &str, date: NaiveDate, currency: &str) -> Result<Decimal> {
        self.coin_history(token, date, currency)?
            .ok_or_else(|| RateKey::new(token, date, currency).missing())
    }

    fn name(&self) -> &str {
        "coingecko"
    }
}

#[cfg(feature = "live")]
pub use http::{CoinHistoryResponse, ReqwestTransport};

#[cfg(feature = "live")]
mod http {
    use super::*;
    use crate::ledger::parse_decimal;
    use reqwest::blocking::Client;
    use reqwest::StatusCode;
    use serde::Deserialize;

    /// Subset of the `/coins/{id}/history` body
    #[derive(Debug, Deserialize)]
    pub struct CoinHistoryResponse {
        pub id: Option<String>,
        pub market_data: Option<MarketData>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MarketData {
        pub current_price: std::collections::HashMap<String, serde_json::Number>,
    }

    impl CoinHistoryResponse {
        /// Current-price map; a body without `market_data` is malformed
        pub fn into_prices(self) -> Result<HashMap<String, Decimal>> {
            let market_data = self.market_data.ok_or_else(|| {
                RewardsError::TransportError(format!(
                    "history response for {} has no market_data",
                    self.id.as_deref().unwrap_or("unknown coin")
                ))
            })?;

            market_data
                .current_price
                .into_iter()
                .map(|(currency, price)| {
                    let rate = parse_decimal(&price.to_string()).map_err(|e| {
                        RewardsError::TransportError(format!("price for {}: {}", currency, e))
                    })?;
                    Ok((normalize_code(&currency), rate))
                })
                .collect()
        }
    }

    /// Blocking HTTP transport
    pub struct ReqwestTransport {
        client: Client,
        base_url: String,
        api_key: Option<String>,
    }

    impl ReqwestTransport {
        pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
            let client = Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(concat!("hotspot-rewards/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| RewardsError::TransportError(format!("Failed to create HTTP client: {}", e)))?;

            Ok(Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key,
            })
        }

        fn key_header(&self) -> &'static str {
            if self.base_url.contains("pro-api") {
                "x-cg-pro-api-key"
            } else {
                "x-cg-demo-api-key"
            }
        }
    }

    impl HistoryTransport for ReqwestTransport {
        fn fetch_history(&self, coin_id: &str, date: NaiveDate) -> Result<HistoryReply> {
            let url = format!("{}/coins/{}/history", self.base_url, coin_id);
            let date_param = date.format(HISTORY_DATE_FORMAT).to_string();

            let mut request = self
                .client
                .get(&url)
                .header("accept", "application/json")
                .query(&[("date", date_param.as_str()), ("localization", "false")]);
            if let Some(key) = &self.api_key {
                request = request.header(self.key_header(), key);
            }

            let response = request
                .send()
                .map_err(|e| RewardsError::TransportError(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Ok(HistoryReply::TooManyRequests);
            }
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(RewardsError::TransportError(format!(
                    "CoinGecko API error {}: {}",
                    status, body
                )));
            }

            let text = response
                .text()
                .map_err(|e| RewardsError::TransportError(format!("Failed to read response: {}", e)))?;
            let body: CoinHistoryResponse = serde_json::from_str(&text)?;

            Ok(HistoryReply::Prices(body.into_prices()?))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rust_decimal_macros::dec;

        #[test]
        fn test_parse_history_body() {
            let body = r#"{
                "id": "helium",
                "symbol": "hnt",
                "market_data": {
                    "current_price": { "usd": 2.31, "eur": 2.1, "btc": 6.2e-5 }
                }
            }"#;
            let parsed: CoinHistoryResponse = serde_json::from_str(body).unwrap();
            let prices = parsed.into_prices().unwrap();

            assert_eq!(prices.get("usd"), Some(&dec!(2.31)));
            assert_eq!(prices.get("btc"), Some(&dec!(0.000062)));
        }

        #[test]
        fn test_missing_market_data_is_transport_error() {
            let parsed: CoinHistoryResponse =
                serde_json::from_str(r#"{"id": "helium", "symbol": "hnt"}"#).unwrap();
            assert!(matches!(parsed.into_prices(), Err(RewardsError::TransportError(_))));
        }

        #[test]
        fn test_transport_creation() {
            let transport = ReqwestTransport::new(COINGECKO_BASE_URL, None).unwrap();
            assert_eq!(transport.key_header(), "x-cg-demo-api-key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Replays canned replies and counts calls
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HistoryReply>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<HistoryReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HistoryTransport for &ScriptedTransport {
        fn fetch_history(&self, _coin_id: &str, _date: NaiveDate) -> Result<HistoryReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RewardsError::TransportError("script exhausted".into())))
        }
    }

    fn prices(usd: Decimal) -> Result<HistoryReply> {
        let mut map = HashMap::new();
        map.insert("usd".to_string(), usd);
        Ok(HistoryReply::Prices(map))
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            delay: Duration::ZERO,
            max_retries: None,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 11, 14).unwrap()
    }

    #[test]
    fn test_rate_limit_then_success_matches_direct_success() {
        let direct = ScriptedTransport::new(vec![prices(dec!(2.31))]);
        let throttled = ScriptedTransport::new(vec![
            Ok(HistoryReply::TooManyRequests),
            Ok(HistoryReply::TooManyRequests),
            prices(dec!(2.31)),
        ]);

        let a = CoinGeckoFetcher::new(&direct).with_policy(no_wait());
        let b = CoinGeckoFetcher::new(&throttled).with_policy(no_wait());

        assert_eq!(a.rate("hnt", date(), "usd").unwrap(), b.rate("hnt", date(), "usd").unwrap());
        assert_eq!(direct.calls(), 1);
        assert_eq!(throttled.calls(), 3);
    }

    #[test]
    fn test_sustained_throttling_does_not_grow_stack() {
        let mut script: Vec<Result<HistoryReply>> =
            (0..50_000).map(|_| Ok(HistoryReply::TooManyRequests)).collect();
        script.push(prices(dec!(1)));
        let transport = ScriptedTransport::new(script);

        let fetcher = CoinGeckoFetcher::new(&transport).with_policy(no_wait());
        assert_eq!(fetcher.rate("hnt", date(), "usd").unwrap(), dec!(1));
        assert_eq!(transport.calls(), 50_001);
    }

    #[test]
    fn test_bounded_retries_give_up() {
        let transport = ScriptedTransport::new(vec![
            Ok(HistoryReply::TooManyRequests),
            Ok(HistoryReply::TooManyRequests),
            Ok(HistoryReply::TooManyRequests),
        ]);
        let policy = RetryPolicy {
            max_retries: Some(2),
            ..no_wait()
        };

        let fetcher = CoinGeckoFetcher::new(&transport).with_policy(policy);
        let err = fetcher.rate("hnt", date(), "usd").unwrap_err();
        assert!(matches!(err, RewardsError::RateLimited { attempts: 3 }));
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(RewardsError::TransportError("connection reset".into())),
            prices(dec!(2)),
        ]);

        let fetcher = CoinGeckoFetcher::new(&transport).with_policy(no_wait());
        assert!(matches!(
            fetcher.rate("hnt", date(), "usd"),
            Err(RewardsError::TransportError(_))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_missing_currency_is_no_rate_not_failure() {
        let transport = ScriptedTransport::new(vec![prices(dec!(2))]);
        let fetcher = CoinGeckoFetcher::new(&transport).with_policy(no_wait());

        assert_eq!(fetcher.coin_history("hnt", date(), "jpy").unwrap(), None);
        assert!(matches!(
            fetcher.rate("hnt", date(), "jpy"),
            Err(RewardsError::MissingRate { .. })
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_memoizes_per_coin_and_date() {
        let transport = ScriptedTransport::new(vec![prices(dec!(2)), prices(dec!(3))]);
        let fetcher = CoinGeckoFetcher::new(&transport).with_policy(no_wait());

        for _ in 0..5 {
            assert_eq!(fetcher.rate("HNT", date(), "USD").unwrap(), dec!(2));
        }
        assert_eq!(transport.calls(), 1);

        let next = date().succ_opt().unwrap();
        assert_eq!(fetcher.rate("hnt", next, "usd").unwrap(), dec!(3));
        assert_eq!(transport.calls(), 2);
        assert_eq!(fetcher.memo_len(), 2);
    }

    #[test]
    fn test_shutdown_interrupts_backoff() {
        let transport = ScriptedTransport::new(vec![Ok(HistoryReply::TooManyRequests), prices(dec!(1))]);
        let shutdown = Arc::new(AtomicBool::new(true));
        let policy = RetryPolicy {
            delay: Duration::from_secs(3600),
            ..no_wait()
        };

        let fetcher = CoinGeckoFetcher::new(&transport)
            .with_policy(policy)
            .with_shutdown(shutdown);
        assert!(matches!(
            fetcher.rate("hnt", date(), "usd"),
            Err(RewardsError::Cancelled)
        ));
    }

    #[test]
    fn test_coin_id_mapping() {
        let transport = ScriptedTransport::new(vec![]);
        let fetcher = CoinGeckoFetcher::new(&transport).with_token_ids([("SOL", "solana")]);

        assert_eq!(fetcher.coin_id("HNT"), "helium");
        assert_eq!(fetcher.coin_id("sol"), "solana");
        assert_eq!(fetcher.coin_id("unknown"), "unknown");
    }
}
