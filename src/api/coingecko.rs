use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OracleConfig;
use crate::execution::{PriceOracle, PriceQuote};
use crate::EngineError;

const MAX_RETRIES: u32 = 3;

type CoinGeckoRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// One coin in the /simple/price response
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    last_updated_at: Option<i64>,
}

/// Price oracle backed by CoinGecko's /simple/price endpoint
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct CoinGeckoOracle {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    /// Uppercased trading pair -> CoinGecko coin id
    coin_ids: HashMap<String, String>,
    rate_limiter: Arc<CoinGeckoRateLimiter>,
    retry_backoff: Duration,
}

impl CoinGeckoOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        // Config keys arrive lowercased from env/TOML sources
        let coin_ids = config
            .coin_ids
            .iter()
            .map(|(pair, id)| (pair.to_uppercase(), id.clone()))
            .collect();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            coin_ids,
            rate_limiter,
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Base delay for retries; attempt n waits `backoff * 2^n`
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn coin_id(&self, pair: &str) -> Option<&str> {
        self.coin_ids.get(&pair.to_uppercase()).map(String::as_str)
    }

    async fn make_request(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;
            let backoff = self.retry_backoff * 2u32.pow(attempt);

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        if attempt == MAX_RETRIES {
                            anyhow::bail!(
                                "CoinGecko returned {} after {} attempts",
                                status,
                                MAX_RETRIES
                            );
                        }
                        tracing::warn!(
                            "CoinGecko returned {}, retrying in {:?} (attempt {}/{})",
                            status,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("CoinGecko API error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => anyhow::bail!("Network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("Failed after {} retries", MAX_RETRIES)
    }

    /// Fetch USD quotes for several pairs in one request; unmapped pairs are skipped
    pub async fn fetch_quotes(&self, pairs: &[&str]) -> Result<HashMap<String, PriceQuote>> {
        let mapped: Vec<(&str, &str)> = pairs
            .iter()
            .filter_map(|pair| self.coin_id(pair).map(|id| (*pair, id)))
            .collect();
        if mapped.is_empty() {
            return Ok(HashMap::new());
        }

        let mut ids: Vec<&str> = mapped.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_last_updated_at=true",
            self.base_url,
            ids.join(",")
        );
        if let Some(key) = &self.api_key {
            url.push_str("&x_cg_demo_api_key=");
            url.push_str(key);
        }

        let response = self.make_request(&url).await?;
        let body: HashMap<String, SimplePrice> = response
            .json()
            .await
            .context("Failed to parse /simple/price response")?;

        let mut quotes = HashMap::new();
        for (pair, id) in mapped {
            let Some(entry) = body.get(id) else {
                continue;
            };
            let Some(price) = entry.usd else {
                continue;
            };
            let as_of = entry
                .last_updated_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now);

            quotes.insert(
                pair.to_string(),
                PriceQuote {
                    pair: pair.to_string(),
                    price,
                    as_of,
                },
            );
        }

        tracing::debug!("Fetched {} CoinGecko quote(s)", quotes.len());
        Ok(quotes)
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn get_price(&self, pair: &str) -> crate::Result<PriceQuote> {
        if self.coin_id(pair).is_none() {
            return Err(EngineError::price_unavailable(pair, "no CoinGecko mapping"));
        }

        let mut quotes = self
            .fetch_quotes(&[pair])
            .await
            .map_err(|e| EngineError::price_unavailable(pair, format!("{:#}", e)))?;

        quotes
            .remove(pair)
            .ok_or_else(|| EngineError::price_unavailable(pair, "missing from CoinGecko response"))
    }
}
