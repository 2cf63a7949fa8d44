//! Engine configuration
//!
//! One JSON document configures the whole engine. Every section is optional
//! and falls back to its defaults:
//!
//! ```json
//! {
//!   "risk": { "max_positions": 3, "daily_max_loss_pct": "0.03" },
//!   "orchestrator": { "cycle_interval_ms": 60000 },
//!   "paper": { "balance": "10000", "symbols": [{ "symbol": "BTCUSDT", "mark": "100" }] },
//!   "store_dir": "./positions",
//!   "candidates_file": "./candidates.json"
//! }
//! ```

use meridian_core::FeeSchedule;
use meridian_gateway::RetryPolicy;
use meridian_order_manager::{ExecutionConfig, LedgerConfig, MonitorConfig};
use meridian_risk_manager::RiskConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// Orchestrator
// ============================================================================

/// Cycle scheduling and candidate filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub cycle_interval_ms: u64,
    /// A cycle running longer than this is logged as abandoned
    pub cycle_timeout_ms: u64,
    /// Candidates scoring below this (after adjustment) are dropped
    pub min_score: Decimal,
    pub max_candidates_per_cycle: usize,
    /// Reconcile against the exchange at the start of every cycle
    pub reconcile_each_cycle: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 60_000,
            cycle_timeout_ms: 180_000,
            min_score: Decimal::ZERO,
            max_candidates_per_cycle: 20,
            reconcile_each_cycle: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms.max(1))
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_interval_ms == 0 || self.cycle_timeout_ms == 0 {
            return Err("cycle interval and timeout must be > 0".to_string());
        }
        if self.min_score < Decimal::ZERO || self.min_score > dec!(100) {
            return Err(format!("min_score must be in [0, 100], got {}", self.min_score));
        }
        if self.max_candidates_per_cycle == 0 {
            return Err("max_candidates_per_cycle must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Gateway retry
// ============================================================================

/// Backoff for transient gateway errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

// ============================================================================
// Paper venue
// ============================================================================

/// A symbol listed on the paper venue at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSymbol {
    pub symbol: String,
    pub mark: Decimal,
}

/// Paper venue used by the `meridian` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperVenueConfig {
    pub balance: Decimal,
    pub symbols: Vec<PaperSymbol>,
}

impl Default for PaperVenueConfig {
    fn default() -> Self {
        Self {
            balance: dec!(10000),
            symbols: Vec::new(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub ledger: LedgerConfig,
    pub monitor: MonitorConfig,
    pub orchestrator: OrchestratorConfig,
    pub fees: FeeSchedule,
    pub retry: RetryConfig,
    pub paper: PaperVenueConfig,
    /// Directory for persisted positions; in-memory when absent
    pub store_dir: Option<PathBuf>,
    /// JSON array of candidates served every cycle
    pub candidates_file: Option<PathBuf>,
}

impl EngineConfig {
    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON config document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.execution.validate().map_err(ConfigError::Invalid)?;
        self.ledger.validate().map_err(ConfigError::Invalid)?;
        self.monitor.validate().map_err(ConfigError::Invalid)?;
        self.orchestrator.validate().map_err(ConfigError::Invalid)?;

        if self.fees.maker_fee >= Decimal::ONE || self.fees.taker_fee >= Decimal::ONE {
            return Err(ConfigError::Invalid("fee rates must be < 1".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.paper.balance <= Decimal::ZERO {
            return Err(ConfigError::Invalid("paper balance must be > 0".to_string()));
        }
        if let Some(bad) = self.paper.symbols.iter().find(|s| s.mark <= Decimal::ZERO) {
            return Err(ConfigError::Invalid(format!(
                "paper mark for {} must be > 0",
                bad.symbol
            )));
        }
        Ok(())
    }
}
