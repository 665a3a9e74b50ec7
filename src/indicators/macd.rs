use serde::Serialize;

use super::moving_average::ema_series;

pub const FAST_PERIOD: usize = 12;
pub const SLOW_PERIOD: usize = 26;
pub const SIGNAL_PERIOD: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line (fast EMA - slow EMA), its signal EMA and the histogram
///
/// Needs at least `slow + signal - 1` prices.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow || signal == 0 {
        return None;
    }

    let fast_ema = ema_series(prices, fast);
    let slow_ema = ema_series(prices, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // fast_ema starts `slow - fast` prices earlier
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, slow_value)| fast_ema[i + offset] - slow_value)
        .collect();

    let signal_line = ema_series(&line, signal);
    let macd = *line.last()?;
    let signal = *signal_line.last()?;

    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}

/// MACD with the standard 12/26/9 periods
pub fn standard_macd(prices: &[f64]) -> Option<Macd> {
    macd(prices, FAST_PERIOD, SLOW_PERIOD, SIGNAL_PERIOD)
}
