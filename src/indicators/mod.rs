// Technical indicators over a closing-price series
pub mod macd;
pub mod moving_average;
pub mod rsi;

use serde::Serialize;

use crate::models::Direction;

pub use macd::{macd, standard_macd, Macd};
pub use moving_average::{ema, ema_series, sma};
pub use rsi::rsi;

pub const RSI_PERIOD: usize = 14;
pub const TREND_PERIOD: usize = 20;

/// Latest indicator readings for one price series
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSnapshot {
    pub last_price: Option<f64>,
    pub sma_20: Option<f64>,
    pub ema_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<Macd>,
}

impl IndicatorSnapshot {
    pub fn from_prices(prices: &[f64]) -> Self {
        Self {
            last_price: prices.last().copied(),
            sma_20: sma(prices, TREND_PERIOD),
            ema_20: ema(prices, TREND_PERIOD),
            rsi_14: rsi(prices, RSI_PERIOD),
            macd: standard_macd(prices),
        }
    }

    /// Momentum bias: follow the MACD histogram unless RSI says the move is stretched
    pub fn bias(&self) -> Option<Direction> {
        let histogram = self.macd?.histogram;
        let rsi = self.rsi_14?;

        if histogram > 0.0 && rsi < 70.0 {
            Some(Direction::Buy)
        } else if histogram < 0.0 && rsi > 30.0 {
            Some(Direction::Sell)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_with_short_history() {
        let snapshot = IndicatorSnapshot::from_prices(&[100.0, 101.0, 102.0]);
        assert_eq!(snapshot.last_price, Some(102.0));
        assert!(snapshot.sma_20.is_none());
        assert!(snapshot.macd.is_none());
        assert!(snapshot.bias().is_none());
    }

    #[test]
    fn test_bias_on_choppy_breakout() {
        // Flat base, then two steps up and a deeper step down: trending but not overbought
        let mut prices = vec![100.0; 40];
        for i in 0..20 {
            let last = prices[prices.len() - 1];
            let step = if i % 3 == 2 { -1.5 } else { 1.0 };
            prices.push(last + step);
        }

        let snapshot = IndicatorSnapshot::from_prices(&prices);
        assert!(snapshot.rsi_14.unwrap() < 70.0);
        assert_eq!(snapshot.bias(), Some(Direction::Buy));
    }

    #[test]
    fn test_no_bias_when_overbought() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 * 1.02f64.powi(i)).collect();
        let snapshot = IndicatorSnapshot::from_prices(&prices);
        assert_eq!(snapshot.rsi_14, Some(100.0));
        assert!(snapshot.bias().is_none());
    }
}
