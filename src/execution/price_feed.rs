use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use crate::{EngineError, Result};

/// Current price for a pair and when it was observed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub pair: String,
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

impl PriceQuote {
    pub fn now(pair: &str, price: f64) -> Self {
        Self {
            pair: pair.to_string(),
            price,
            as_of: Utc::now(),
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.as_of).num_seconds()
    }
}

/// Source of current market prices
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, pair: &str) -> Result<PriceQuote>;
}

/// Oracle with prices set by hand; unknown pairs are unavailable
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    quotes: RwLock<HashMap<String, PriceQuote>>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices(prices: &[(&str, f64)]) -> Self {
        let quotes = prices
            .iter()
            .map(|(pair, price)| (pair.to_string(), PriceQuote::now(pair, *price)))
            .collect();
        Self {
            quotes: RwLock::new(quotes),
        }
    }

    pub async fn set_price(&self, pair: &str, price: f64) {
        self.set_quote(PriceQuote::now(pair, price)).await;
    }

    pub async fn set_quote(&self, quote: PriceQuote) {
        self.quotes.write().await.insert(quote.pair.clone(), quote);
    }

    /// Make the pair unavailable
    pub async fn remove(&self, pair: &str) {
        self.quotes.write().await.remove(pair);
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn get_price(&self, pair: &str) -> Result<PriceQuote> {
        self.quotes
            .read()
            .await
            .get(pair)
            .cloned()
            .ok_or_else(|| EngineError::price_unavailable(pair, "no quote"))
    }
}

/// Seeded random walk around a set of starting prices
///
/// Every read moves the pair by a uniform step of up to `volatility`
/// (fraction of price), so repeated runs with one seed replay the same path.
pub struct RandomWalkOracle {
    prices: Mutex<HashMap<String, f64>>,
    rng: Mutex<StdRng>,
    volatility: f64,
}

impl RandomWalkOracle {
    pub fn new(seed: u64, starting_prices: &[(&str, f64)], volatility: f64) -> Self {
        Self {
            prices: Mutex::new(
                starting_prices
                    .iter()
                    .map(|(pair, price)| (pair.to_string(), *price))
                    .collect(),
            ),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            volatility: volatility.abs(),
        }
    }

    pub async fn pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.prices.lock().await.keys().cloned().collect();
        pairs.sort();
        pairs
    }
}

#[async_trait]
impl PriceOracle for RandomWalkOracle {
    async fn get_price(&self, pair: &str) -> Result<PriceQuote> {
        let mut prices = self.prices.lock().await;
        let price = prices
            .get_mut(pair)
            .ok_or_else(|| EngineError::price_unavailable(pair, "pair not simulated"))?;

        if self.volatility > 0.0 {
            let step = self.rng.lock().await.gen_range(-self.volatility..self.volatility);
            *price = (*price * (1.0 + step)).max(f64::MIN_POSITIVE);
        }

        Ok(PriceQuote::now(pair, *price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_oracle() {
        let oracle = StaticPriceOracle::with_prices(&[("BTC/USDC", 50_000.0)]);

        let quote = oracle.get_price("BTC/USDC").await.unwrap();
        assert_eq!(quote.price, 50_000.0);

        oracle.set_price("BTC/USDC", 51_000.0).await;
        assert_eq!(oracle.get_price("BTC/USDC").await.unwrap().price, 51_000.0);

        oracle.remove("BTC/USDC").await;
        assert!(matches!(
            oracle.get_price("BTC/USDC").await,
            Err(EngineError::PriceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_random_walk_is_reproducible() {
        let a = RandomWalkOracle::new(42, &[("SOL/USDC", 150.0)], 0.01);
        let b = RandomWalkOracle::new(42, &[("SOL/USDC", 150.0)], 0.01);

        for _ in 0..10 {
            let pa = a.get_price("SOL/USDC").await.unwrap().price;
            let pb = b.get_price("SOL/USDC").await.unwrap().price;
            assert_eq!(pa, pb);
            assert!(pa > 0.0);
        }
    }

    #[tokio::test]
    async fn test_random_walk_step_is_bounded() {
        let oracle = RandomWalkOracle::new(7, &[("ETH/USDC", 3_000.0)], 0.02);

        let mut previous = 3_000.0;
        for _ in 0..50 {
            let price = oracle.get_price("ETH/USDC").await.unwrap().price;
            assert!((price / previous - 1.0).abs() <= 0.02 + 1e-12);
            previous = price;
        }
        assert!(oracle.get_price("DOGE/USDC").await.is_err());
    }
}
