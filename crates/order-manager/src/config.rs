//! Execution, ledger and monitor configuration
//!
//! Durations are stored in milliseconds so the JSON form stays flat;
//! accessors hand out `std::time::Duration` / `chrono::Duration`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Entry execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How long one post-only quote may rest before it is cancelled
    pub order_timeout_ms: u64,
    /// Order status poll cadence while a quote rests
    pub poll_interval_ms: u64,
    /// Post-only attempts before falling back to a market order
    pub max_attempts: u32,
    /// Distance of the first quote from the reference, on the passive side
    pub maker_buffer_pct: Decimal,
    /// Step toward the reference on each re-quote
    pub price_improvement_pct: Decimal,
    /// Ceiling on one whole execution call
    pub execution_timeout_ms: u64,
    /// Minimum distance to liquidation as a fraction of entry
    pub headroom_min_pct: Decimal,
    /// Fraction of the position cut per headroom iteration
    pub reduce_step_pct: Decimal,
    pub max_headroom_iterations: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: 3_000,
            poll_interval_ms: 500,
            max_attempts: 3,
            maker_buffer_pct: dec!(0.0005),
            price_improvement_pct: dec!(0.0002),
            execution_timeout_ms: 30_000,
            headroom_min_pct: dec!(0.10),
            reduce_step_pct: dec!(0.25),
            max_headroom_iterations: 3,
        }
    }
}

impl ExecutionConfig {
    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.order_timeout_ms == 0 || self.execution_timeout_ms == 0 {
            return Err("execution timeouts must be > 0".to_string());
        }
        if self.maker_buffer_pct < Decimal::ZERO || self.price_improvement_pct < Decimal::ZERO {
            return Err("maker buffer and price improvement must be >= 0".to_string());
        }
        if self.reduce_step_pct <= Decimal::ZERO || self.reduce_step_pct >= Decimal::ONE {
            return Err(format!(
                "reduce_step_pct must be in (0, 1), got {}",
                self.reduce_step_pct
            ));
        }
        if self.headroom_min_pct < Decimal::ZERO {
            return Err("headroom_min_pct must be >= 0".to_string());
        }
        Ok(())
    }
}

/// Ledger and reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Protective stop distance for positions adopted from the exchange
    pub ghost_stop_loss_pct: Decimal,
    /// Closed positions kept in memory for status queries
    pub archive_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ghost_stop_loss_pct: dec!(0.02),
            archive_capacity: 500,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ghost_stop_loss_pct <= Decimal::ZERO || self.ghost_stop_loss_pct >= Decimal::ONE {
            return Err(format!(
                "ghost_stop_loss_pct must be in (0, 1), got {}",
                self.ghost_stop_loss_pct
            ));
        }
        Ok(())
    }
}

/// Profit tier that tightens the trailing callback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TighteningTier {
    /// Profit as a multiple of `trailing_activation_pct`
    pub profit_multiple: Decimal,
    /// Factor applied to the base callback once the tier is reached
    pub factor: Decimal,
}

impl TighteningTier {
    pub fn new(profit_multiple: Decimal, factor: Decimal) -> Self {
        Self {
            profit_multiple,
            factor,
        }
    }
}

/// Exit management policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval_ms: u64,

    /// Loss (fraction of entry) that closes everything immediately
    pub emergency_stop_pct: Decimal,

    pub trailing_activation_pct: Decimal,
    pub atr_callback_multiplier: Decimal,
    pub min_callback_pct: Decimal,
    pub max_callback_pct: Decimal,
    /// Sorted by `profit_multiple`; the highest reached tier applies
    pub tightening_tiers: Vec<TighteningTier>,
    pub reversal_lookback_ticks: usize,
    pub reversal_momentum_pct: Decimal,
    pub reversal_widen_factor: Decimal,

    pub funding_exit_window_ms: u64,
    pub funding_rate_threshold: Decimal,
    pub funding_min_profit_pct: Decimal,

    pub breakeven_activation_pct: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            emergency_stop_pct: dec!(0.05),
            trailing_activation_pct: dec!(0.015),
            atr_callback_multiplier: dec!(1.0),
            min_callback_pct: dec!(0.003),
            max_callback_pct: dec!(0.02),
            tightening_tiers: vec![
                TighteningTier::new(dec!(2), dec!(0.75)),
                TighteningTier::new(dec!(3), dec!(0.5)),
            ],
            reversal_lookback_ticks: 5,
            reversal_momentum_pct: dec!(0.004),
            reversal_widen_factor: dec!(1.5),
            funding_exit_window_ms: 10 * 60 * 1000,
            funding_rate_threshold: dec!(0.0005),
            funding_min_profit_pct: dec!(0.002),
            breakeven_activation_pct: dec!(0.02),
        }
    }
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn funding_exit_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.funding_exit_window_ms).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.emergency_stop_pct <= Decimal::ZERO {
            return Err("emergency_stop_pct must be > 0".to_string());
        }
        if self.min_callback_pct <= Decimal::ZERO || self.min_callback_pct > self.max_callback_pct {
            return Err("callback bounds must satisfy 0 < min <= max".to_string());
        }
        if self.reversal_widen_factor < Decimal::ONE {
            return Err("reversal_widen_factor must be >= 1".to_string());
        }
        if self
            .tightening_tiers
            .iter()
            .any(|t| t.factor <= Decimal::ZERO || t.factor > Decimal::ONE)
        {
            return Err("tightening factors must be in (0, 1]".to_string());
        }
        if self
            .tightening_tiers
            .windows(2)
            .any(|w| w[0].profit_multiple > w[1].profit_multiple)
        {
            return Err("tightening_tiers must be sorted by profit_multiple".to_string());
        }
        Ok(())
    }
}
