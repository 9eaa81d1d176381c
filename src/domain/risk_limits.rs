//! Risk limits for a [`RiskGovernor`](super::governor::RiskGovernor).

use super::error::QuantGuardError;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiskLimits {
    /// Fraction of balance risked per trade.
    pub max_risk_per_trade: f64,
    /// Drawdown fraction that pauses trading.
    pub max_drawdown: f64,
    pub max_positions: usize,
    /// Daily loss fraction that pauses trading.
    pub max_daily_loss: f64,
    pub max_consecutive_losses: u32,
    pub min_risk_reward_ratio: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            max_risk_per_trade: 0.02,
            max_drawdown: 0.15,
            max_positions: 3,
            max_daily_loss: 0.05,
            max_consecutive_losses: 3,
            min_risk_reward_ratio: 2.0,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), QuantGuardError> {
        check_fraction("max_risk_per_trade", self.max_risk_per_trade)?;
        check_fraction("max_drawdown", self.max_drawdown)?;
        check_fraction("max_daily_loss", self.max_daily_loss)?;

        if self.max_positions < 1 {
            return Err(QuantGuardError::InvalidLimit {
                field: "max_positions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_consecutive_losses < 1 {
            return Err(QuantGuardError::InvalidLimit {
                field: "max_consecutive_losses",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.min_risk_reward_ratio > 0.0 && self.min_risk_reward_ratio.is_finite()) {
            return Err(QuantGuardError::InvalidLimit {
                field: "min_risk_reward_ratio",
                reason: format!("must be positive, got {}", self.min_risk_reward_ratio),
            });
        }
        Ok(())
    }
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), QuantGuardError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(QuantGuardError::InvalidLimit {
            field,
            reason: format!("must be in (0, 1], got {value}"),
        })
    }
}
