//! Risk gate configuration

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Limits and sizing policy applied by the risk gate
///
/// All percentages are fractions of account equity (`0.02` = 2%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Risk per trade with no active streak
    pub base_risk_per_trade_pct: Decimal,
    /// Floor after loss-streak reductions
    pub min_risk_per_trade_pct: Decimal,
    /// Cap after win-streak increases
    pub max_risk_per_trade_pct: Decimal,

    /// Every this many consecutive wins multiplies risk by `win_streak_multiplier` (0 = off)
    pub win_streak_threshold: u32,
    pub win_streak_multiplier: Decimal,
    /// Every this many consecutive losses multiplies risk by `loss_streak_multiplier` (0 = off)
    pub loss_streak_threshold: u32,
    pub loss_streak_multiplier: Decimal,

    /// Cap on risk committed across open positions and reservations
    pub max_portfolio_risk_pct: Decimal,
    pub max_positions: usize,

    /// Realized daily loss that halts new entries
    pub daily_max_loss_pct: Decimal,
    /// Drawdown from the intraday equity peak that halts new entries
    pub intraday_drawdown_hard_stop_pct: Decimal,
    /// How long the circuit breaker blocks entries once tripped
    pub circuit_breaker_cooldown_ms: u64,
    /// Consecutive losing closes that trip the breaker (0 = off)
    pub max_consecutive_losses: u32,

    /// Maximum absolute correlation with open/accepted symbols
    pub correlation_threshold: f64,

    pub max_leverage: Decimal,
    /// Margin (notional / leverage) one position may use
    pub max_margin_per_position_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_per_trade_pct: dec!(0.01),
            min_risk_per_trade_pct: dec!(0.0025),
            max_risk_per_trade_pct: dec!(0.02),
            win_streak_threshold: 3,
            win_streak_multiplier: dec!(1.3),
            loss_streak_threshold: 2,
            loss_streak_multiplier: dec!(0.5),
            max_portfolio_risk_pct: dec!(0.06),
            max_positions: 5,
            daily_max_loss_pct: dec!(0.03),
            intraday_drawdown_hard_stop_pct: dec!(0.05),
            circuit_breaker_cooldown_ms: 4 * 60 * 60 * 1000,
            max_consecutive_losses: 5,
            correlation_threshold: 0.7,
            max_leverage: dec!(10),
            max_margin_per_position_pct: dec!(1.0),
        }
    }
}

impl RiskConfig {
    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.circuit_breaker_cooldown_ms).unwrap_or(i64::MAX))
    }

    /// Risk fraction for the next trade given the current streaks
    ///
    /// Wins step the base up by `win_streak_multiplier` per full threshold
    /// (capped at the max); losses step it down by `loss_streak_multiplier`
    /// (floored at the min). At most one of the two streaks is non-zero.
    pub fn streak_adjusted_risk(&self, consecutive_wins: u32, consecutive_losses: u32) -> Decimal {
        let base = self.base_risk_per_trade_pct;

        if self.win_streak_threshold > 0 && consecutive_wins >= self.win_streak_threshold {
            let steps = consecutive_wins / self.win_streak_threshold;
            let risk = (0..steps).fold(base, |r, _| r * self.win_streak_multiplier);
            return risk.min(self.max_risk_per_trade_pct);
        }

        if self.loss_streak_threshold > 0 && consecutive_losses >= self.loss_streak_threshold {
            let steps = consecutive_losses / self.loss_streak_threshold;
            let risk = (0..steps).fold(base, |r, _| r * self.loss_streak_multiplier);
            return risk.max(self.min_risk_per_trade_pct);
        }

        base
    }

    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, v: Decimal| -> Result<()> {
            if v <= Decimal::ZERO || v > Decimal::ONE {
                return Err(Error::InvalidConfig(format!("{name} must be in (0, 1], got {v}")));
            }
            Ok(())
        };

        fraction("base_risk_per_trade_pct", self.base_risk_per_trade_pct)?;
        fraction("min_risk_per_trade_pct", self.min_risk_per_trade_pct)?;
        fraction("max_risk_per_trade_pct", self.max_risk_per_trade_pct)?;
        fraction("max_portfolio_risk_pct", self.max_portfolio_risk_pct)?;
        fraction("daily_max_loss_pct", self.daily_max_loss_pct)?;
        fraction(
            "intraday_drawdown_hard_stop_pct",
            self.intraday_drawdown_hard_stop_pct,
        )?;
        fraction("max_margin_per_position_pct", self.max_margin_per_position_pct)?;

        if self.min_risk_per_trade_pct > self.base_risk_per_trade_pct
            || self.base_risk_per_trade_pct > self.max_risk_per_trade_pct
        {
            return Err(Error::InvalidConfig(
                "risk per trade must satisfy min <= base <= max".to_string(),
            ));
        }
        if self.win_streak_multiplier < Decimal::ONE {
            return Err(Error::InvalidConfig(
                "win_streak_multiplier must be >= 1".to_string(),
            ));
        }
        if self.loss_streak_multiplier <= Decimal::ZERO || self.loss_streak_multiplier > Decimal::ONE
        {
            return Err(Error::InvalidConfig(
                "loss_streak_multiplier must be in (0, 1]".to_string(),
            ));
        }
        if self.max_positions == 0 {
            return Err(Error::InvalidConfig("max_positions must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(Error::InvalidConfig(format!(
                "correlation_threshold must be in [0, 1], got {}",
                self.correlation_threshold
            )));
        }
        if self.max_leverage < Decimal::ONE {
            return Err(Error::InvalidConfig("max_leverage must be >= 1".to_string()));
        }
        Ok(())
    }
}
