use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::VerifyError;
use crate::models::{PriceSample, PriceSeries};
use crate::prices::PriceHistoryProvider;

const BASE_URL: &str = "https://api.coinbase.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
const MAX_CANDLES_PER_REQUEST: i64 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct JwtClaims {
    sub: String,
    iss: String,
    nbf: u64,
    exp: u64,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    candles: Vec<RawCandle>,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    start: String,
    low: String,
    high: String,
    open: String,
    close: String,
    volume: String,
}

/// Coinbase candle granularities, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    OneMinute,
    FiveMinute,
    FifteenMinute,
    OneHour,
    OneDay,
}

impl Granularity {
    fn as_str(&self) -> &'static str {
        match self {
            Granularity::OneMinute => "ONE_MINUTE",
            Granularity::FiveMinute => "FIVE_MINUTE",
            Granularity::FifteenMinute => "FIFTEEN_MINUTE",
            Granularity::OneHour => "ONE_HOUR",
            Granularity::OneDay => "ONE_DAY",
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            Granularity::OneMinute => 60,
            Granularity::FiveMinute => 300,
            Granularity::FifteenMinute => 900,
            Granularity::OneHour => 3600,
            Granularity::OneDay => 86400,
        }
    }

    /// Finest bars that keep a window within a handful of requests.
    fn for_window(window: ChronoDuration) -> Self {
        if window <= ChronoDuration::hours(6) {
            Granularity::OneMinute
        } else if window <= ChronoDuration::days(1) {
            Granularity::FiveMinute
        } else if window <= ChronoDuration::days(3) {
            Granularity::FifteenMinute
        } else if window <= ChronoDuration::days(12) {
            Granularity::OneHour
        } else {
            Granularity::OneDay
        }
    }
}

/// Maps signal symbols ("BTC", "BTCUSDT", "BTC-USD") to Coinbase product ids.
pub fn product_id(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase();
    if s.contains('-') {
        return s;
    }
    let base = s
        .strip_suffix("USDT")
        .or_else(|| s.strip_suffix("USDC"))
        .or_else(|| s.strip_suffix("USD"))
        .filter(|b| !b.is_empty())
        .unwrap_or(&s);
    format!("{}-USD", base)
}

pub struct CoinbaseClient {
    client: Client,
    api_key: String,
    api_secret: String,
    last_request: Mutex<Option<Instant>>,
}

impl CoinbaseClient {
    pub fn new(cfg: &Config) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: cfg.coinbase_api_key.clone(),
            api_secret: cfg.coinbase_api_secret.clone(),
            last_request: Mutex::new(None),
        }
    }

    fn generate_jwt(&self, method: &str, path: &str) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let uri = format!("{} {}{}", method, "api.coinbase.com", path);

        let claims = JwtClaims {
            sub: self.api_key.clone(),
            iss: "cdp".to_string(),
            nbf: now,
            exp: now + 120,
            uri,
        };

        let key = EncodingKey::from_ec_pem(self.api_secret.as_bytes())
            .context("Failed to parse API secret as EC key")?;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.api_key.clone());
        header.typ = Some("JWT".to_string());

        encode(&header, &claims, &key).context("Failed to encode JWT")
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// One page of candles, `start..end` in unix seconds.
    async fn fetch_page(
        &self,
        product: &str,
        granularity: Granularity,
        start: i64,
        end: i64,
    ) -> Result<Vec<PriceSample>> {
        self.rate_limit().await;

        let path = format!("/api/v3/brokerage/market/products/{}/candles", product);

        let mut request = self
            .client
            .get(format!("{}{}", BASE_URL, path))
            .query(&[
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("granularity", granularity.as_str().to_string()),
                ("limit", MAX_CANDLES_PER_REQUEST.to_string()),
            ]);
        if !self.api_key.is_empty() {
            let jwt = self.generate_jwt("GET", &path)?;
            request = request.header("Authorization", format!("Bearer {}", jwt));
        }

        let resp = request.send().await.context("Failed to fetch candles")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Coinbase API error {}: {}", status, body);
        }

        let data: CandleResponse = resp
            .json()
            .await
            .context("Failed to parse candle response")?;

        Ok(data
            .candles
            .into_iter()
            .filter_map(|rc| {
                let ts = rc.start.parse::<i64>().ok()?;
                Some(PriceSample {
                    timestamp: DateTime::from_timestamp(ts, 0)?,
                    open: rc.open.parse().ok(),
                    high: rc.high.parse().ok(),
                    low: rc.low.parse().ok(),
                    close: rc.close.parse().ok()?,
                    volume: rc.volume.parse().ok(),
                })
            })
            .collect())
    }

    /// Paginate through `from..to`. Any failed page fails the whole fetch,
    /// since a silent hole would be read as "price never went there".
    pub async fn fetch_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PriceSeries> {
        let product = product_id(symbol);
        let granularity = Granularity::for_window(to - from);
        let chunk = granularity.seconds() * MAX_CANDLES_PER_REQUEST;

        let end_ts = to.timestamp();
        let mut chunk_start = from.timestamp();
        let mut samples = Vec::new();
        let mut pages = 0usize;

        while chunk_start < end_ts {
            let chunk_end = (chunk_start + chunk).min(end_ts);
            let page = self
                .fetch_page(&product, granularity, chunk_start, chunk_end)
                .await
                .with_context(|| format!("{} page {}", product, pages + 1))?;
            samples.extend(page);
            pages += 1;
            chunk_start = chunk_end;
        }

        debug!(
            "Fetched {} {} candles for {} in {} pages",
            samples.len(),
            granularity.as_str(),
            product,
            pages
        );

        // Coinbase returns newest first; PriceSeries sorts and dedups
        Ok(PriceSeries::new(samples).within(from, to))
    }
}

#[async_trait]
impl PriceHistoryProvider for CoinbaseClient {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn get_prices(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::error::Result<PriceSeries> {
        if to <= from {
            return Ok(PriceSeries::default());
        }
        self.fetch_range(symbol, from, to)
            .await
            .map_err(|e| VerifyError::FetchFailure {
                symbol: symbol.to_string(),
                reason: format!("{:#}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_id_normalizes_symbols() {
        assert_eq!(product_id("BTC"), "BTC-USD");
        assert_eq!(product_id("ethusdt"), "ETH-USD");
        assert_eq!(product_id("SOL-USD"), "SOL-USD");
        assert_eq!(product_id("USD"), "USD-USD");
    }

    #[test]
    fn granularity_coarsens_with_window() {
        assert_eq!(
            Granularity::for_window(ChronoDuration::hours(4)),
            Granularity::OneMinute
        );
        assert_eq!(
            Granularity::for_window(ChronoDuration::days(3)),
            Granularity::FifteenMinute
        );
        assert_eq!(
            Granularity::for_window(ChronoDuration::days(30)),
            Granularity::OneDay
        );
    }
}
