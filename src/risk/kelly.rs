use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Position cap applied when the caller gives none (or an invalid one)
pub const DEFAULT_MAX_POSITION_PERCENT: f64 = 25.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyInput {
    pub win_rate: f64, // percent, exclusive (0, 100)
    pub avg_win: f64,
    pub avg_loss: f64, // magnitude
    #[serde(default)]
    pub max_position_percent: Option<f64>,
    #[serde(default)]
    pub bankroll: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    fn from_kelly(kelly: f64) -> Self {
        if kelly > 0.15 {
            RiskLevel::Aggressive
        } else if kelly > 0.07 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Conservative
        }
    }
}

/// Kelly sizing recommendation, rounded to cents / basis points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellySizing {
    pub kelly_percentage: f64,      // full Kelly, percent of bankroll
    pub fractional_kelly: f64,      // half Kelly, percent of bankroll
    pub recommended_size: f64,      // half Kelly applied to the bankroll
    pub edge_percentage: f64,
    pub expected_value: f64,        // per unit risked
    pub risk_level: RiskLevel,
}

impl KellySizing {
    /// Full Kelly as a fraction of bankroll
    pub fn kelly_fraction(&self) -> f64 {
        self.kelly_percentage / 100.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Kelly position size from a win rate and average payoff
///
/// Rejects win rates outside the open interval (0, 100) and non-positive
/// averages. The fraction is clamped to [0, 1] and then to the position cap.
pub fn calculate_kelly(input: &KellyInput) -> Result<KellySizing> {
    if !(input.win_rate > 0.0 && input.win_rate < 100.0) {
        return Err(EngineError::InvalidKellyInput(format!(
            "win rate must be between 0 and 100 exclusive (got {})",
            input.win_rate
        )));
    }
    if !(input.avg_win > 0.0 && input.avg_win.is_finite()) {
        return Err(EngineError::InvalidKellyInput(format!(
            "average win must be positive (got {})",
            input.avg_win
        )));
    }
    if !(input.avg_loss > 0.0 && input.avg_loss.is_finite()) {
        return Err(EngineError::InvalidKellyInput(format!(
            "average loss must be positive (got {})",
            input.avg_loss
        )));
    }

    let max_position_percent = match input.max_position_percent {
        Some(max) if max > 0.0 && max <= 100.0 => max,
        _ => DEFAULT_MAX_POSITION_PERCENT,
    };

    let p = input.win_rate / 100.0;
    let q = 1.0 - p;
    let b = input.avg_win / input.avg_loss;

    let kelly = ((b * p - q) / b)
        .clamp(0.0, 1.0)
        .min(max_position_percent / 100.0);
    let fractional = kelly / 2.0;

    let expected_value = p * input.avg_win - q * input.avg_loss;
    let edge_percentage = expected_value / input.avg_loss * 100.0;

    let recommended_size = match input.bankroll {
        Some(bankroll) if bankroll > 0.0 && bankroll.is_finite() => fractional * bankroll,
        _ => 0.0,
    };

    Ok(KellySizing {
        kelly_percentage: round2(kelly * 100.0),
        fractional_kelly: round2(fractional * 100.0),
        recommended_size: round2(recommended_size),
        edge_percentage: round2(edge_percentage),
        expected_value: round2(expected_value),
        risk_level: RiskLevel::from_kelly(kelly),
    })
}
