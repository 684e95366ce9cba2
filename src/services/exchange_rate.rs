// USD/ZMW exchange rate client
//
// Live fetch with retry and exponential backoff. When every attempt fails we
// answer with the last rate fetched by this process, then with the newest
// stored indicator.

use crate::config::ExchangeRateConfig;
use crate::db::{self, SharedDb};
use crate::entities::economic;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{instrument, warn};

pub const SOURCE_NAME: &str = "exchangerate-api.com";

/// Anything that can produce the current USD→ZMW rate
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_usd_zmw(&self) -> Result<f64>;
}

/// `GET <url>` answering `{"rates": {"ZMW": <number>}}`
pub struct HttpRateSource {
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

impl HttpRateSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_usd_zmw(&self) -> Result<f64> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?
            .error_for_status()?;
        let body: RatesResponse = response.json().await.context("malformed rates payload")?;
        let rate = body
            .rates
            .get("ZMW")
            .copied()
            .ok_or_else(|| anyhow!("rates payload has no ZMW entry"))?;
        if rate <= 0.0 {
            return Err(anyhow!("non-positive ZMW rate {}", rate));
        }
        Ok(rate)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2×base, 4×base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    Live,
    Cached,
    Stored,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub rate: f64,
    pub origin: RateOrigin,
}

pub struct ExchangeRates {
    source: Arc<dyn RateSource>,
    retry: RetryPolicy,
    last_good: Mutex<Option<f64>>,
}

impl ExchangeRates {
    pub fn new(source: Arc<dyn RateSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            last_good: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ExchangeRateConfig) -> Result<Self> {
        let source = HttpRateSource::new(&config.url, Duration::from_secs(config.timeout_secs))?;
        Ok(Self::new(
            Arc::new(source),
            RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_backoff_ms: config.base_backoff_ms,
            },
        ))
    }

    /// Live rate only; `None` once every attempt has failed
    #[instrument(name = "exchange_rate_fetch", skip(self))]
    pub async fn fetch_live(&self) -> Option<f64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch_usd_zmw().await {
                Ok(rate) => {
                    if let Ok(mut cached) = self.last_good.lock() {
                        *cached = Some(rate);
                    }
                    return Some(rate);
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    tracing::error!(attempts = attempt, error = %e, "exchange rate fetch failed");
                    return None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "exchange rate fetch failed, retrying");
                }
            }
            tokio::time::sleep(self.retry.backoff(attempt)).await;
        }
    }

    pub fn cached(&self) -> Option<f64> {
        self.last_good.lock().ok().and_then(|cached| *cached)
    }

    /// Best available rate: live, then cached, then the newest stored indicator
    pub async fn quote(&self, db: &SharedDb) -> Result<Option<Quote>> {
        if let Some(rate) = self.fetch_live().await {
            return Ok(Some(Quote {
                rate,
                origin: RateOrigin::Live,
            }));
        }
        if let Some(rate) = self.cached() {
            warn!(rate, "serving cached exchange rate");
            return Ok(Some(Quote {
                rate,
                origin: RateOrigin::Cached,
            }));
        }
        let conn = db::lock(db)?;
        let stored = economic::latest_exchange_rate(&conn)?;
        if let Some(rate) = stored {
            warn!(rate, "serving stored exchange rate");
        }
        Ok(stored.map(|rate| Quote {
            rate,
            origin: RateOrigin::Stored,
        }))
    }

    /// Convert between USD and ZMW; same currency is returned unchanged
    pub async fn convert(&self, db: &SharedDb, amount: f64, from: &str, to: &str) -> Result<Option<f64>> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(Some(amount));
        }
        if direction(from, to).is_none() {
            return Ok(None);
        }
        Ok(self
            .quote(db)
            .await?
            .and_then(|quote| convert_with_rate(amount, from, to, quote.rate)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    UsdToZmw,
    ZmwToUsd,
}

fn direction(from: &str, to: &str) -> Option<Direction> {
    match (from.to_ascii_uppercase().as_str(), to.to_ascii_uppercase().as_str()) {
        ("USD", "ZMW") => Some(Direction::UsdToZmw),
        ("ZMW", "USD") => Some(Direction::ZmwToUsd),
        _ => None,
    }
}

pub fn convert_with_rate(amount: f64, from: &str, to: &str, rate: f64) -> Option<f64> {
    if from.eq_ignore_ascii_case(to) {
        return Some(amount);
    }
    match direction(from, to)? {
        Direction::UsdToZmw => Some(amount * rate),
        Direction::ZmwToUsd if rate != 0.0 => Some(amount / rate),
        Direction::ZmwToUsd => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times, then answers `rate`
    struct FlakySource {
        failures: u32,
        rate: f64,
        calls: AtomicU32,
    }

    impl FlakySource {
        fn new(failures: u32, rate: f64) -> Arc<Self> {
            Arc::new(Self {
                failures,
                rate,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl RateSource for FlakySource {
        async fn fetch_usd_zmw(&self) -> Result<f64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(anyhow!("upstream unavailable"))
            } else {
                Ok(self.rate)
            }
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff_ms: 0,
        }
    }

    fn empty_db() -> SharedDb {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        db::shared(conn)
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff_ms: 100,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_from_config_builds_http_source() {
        let config = ExchangeRateConfig {
            max_attempts: 0,
            base_backoff_ms: 50,
            ..Default::default()
        };
        let rates = ExchangeRates::from_config(&config).unwrap();
        assert_eq!(rates.retry.max_attempts, 1);
        assert_eq!(rates.retry.base_backoff_ms, 50);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let source = FlakySource::new(2, 26.4);
        let rates = ExchangeRates::new(source.clone(), fast_retry(3));
        assert_eq!(rates.fetch_live().await, Some(26.4));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(rates.cached(), Some(26.4));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let source = FlakySource::new(10, 26.4);
        let rates = ExchangeRates::new(source.clone(), fast_retry(3));
        assert_eq!(rates.fetch_live().await, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_cache_then_store() {
        let db = empty_db();

        // First call succeeds and fills the cache; the next two attempts fail
        let source = FlakySource::new(0, 25.0);
        let rates = ExchangeRates::new(source, fast_retry(1));
        assert_eq!(rates.quote(&db).await.unwrap().unwrap().origin, RateOrigin::Live);

        let failing = ExchangeRates::new(FlakySource::new(10, 0.0), fast_retry(2));
        assert!(failing.quote(&db).await.unwrap().is_none());

        {
            let conn = db::lock(&db).unwrap();
            economic::upsert_exchange_rate(&conn, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(), 18.91, "seed").unwrap();
        }
        let quote = failing.quote(&db).await.unwrap().unwrap();
        assert_eq!(quote.origin, RateOrigin::Stored);
        assert_eq!(quote.rate, 18.91);

        *failing.last_good.lock().unwrap() = Some(24.0);
        let quote = failing.quote(&db).await.unwrap().unwrap();
        assert_eq!(quote.origin, RateOrigin::Cached);
        assert_eq!(quote.rate, 24.0);
    }

    #[tokio::test]
    async fn test_convert() {
        let db = empty_db();
        let rates = ExchangeRates::new(FlakySource::new(0, 20.0), fast_retry(1));
        assert_eq!(rates.convert(&db, 10.0, "USD", "ZMW").await.unwrap(), Some(200.0));
        assert_eq!(rates.convert(&db, 200.0, "ZMW", "USD").await.unwrap(), Some(10.0));
        assert_eq!(rates.convert(&db, 50.0, "ZMW", "ZMW").await.unwrap(), Some(50.0));
        assert_eq!(rates.convert(&db, 50.0, "EUR", "ZMW").await.unwrap(), None);

        let offline = ExchangeRates::new(FlakySource::new(10, 0.0), fast_retry(1));
        assert_eq!(offline.convert(&db, 10.0, "USD", "ZMW").await.unwrap(), None);
    }
}
