/// Mean of the last `period` prices
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// EMA value after every price from index `period - 1` on, seeded with the
/// SMA of the first `period` prices
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(seed);
    for price in &prices[period..] {
        let prev = series[series.len() - 1];
        series.push(prev + alpha * (price - prev));
    }
    series
}

/// Latest EMA over the whole series
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_uses_latest_window() {
        let prices = [90.0, 100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(sma(&prices, 5), Some(104.0));
        assert_eq!(sma(&prices, 7), None);
        assert_eq!(sma(&prices, 0), None);
    }

    #[test]
    fn test_ema_of_flat_series_is_flat() {
        let prices = [50.0; 30];
        assert_eq!(ema(&prices, 10), Some(50.0));
    }

    #[test]
    fn test_ema_series_length_and_lag() {
        let prices: Vec<f64> = (1..=10).map(|p| p as f64).collect();
        let series = ema_series(&prices, 3);

        assert_eq!(series.len(), 8);
        assert_eq!(series[0], 2.0);
        // alpha 0.5: 2 -> 3 -> 4 ...; trails a linear ramp by one step
        assert_eq!(series[1], 3.0);
        assert_eq!(*series.last().unwrap(), 9.0);
    }
}
