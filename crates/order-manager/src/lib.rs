//! Meridian Order Manager
//!
//! Everything between an approved risk decision and a closed position:
//! - **Execution**: maker-first entry protocol with re-quotes and a market
//!   fallback, followed by a liquidation headroom check
//! - **Ledger**: the authoritative open-position set, persistence and
//!   reconciliation against the exchange
//! - **Monitor**: per-tick exit management (emergency stop, stop loss,
//!   trailing stop, funding exit, partial take-profit, breakeven)
//!
//! ## Architecture
//!
//! ```text
//!  RiskDecision ──► OrderExecutor ──► ExchangeGateway
//!                        │  filled
//!                        ▼
//!                  PositionLedger ◄──── reconcile ◄──── AccountState
//!                   │    ▲   │
//!          save/emit│    │   │ record_close
//!                   ▼    │   ▼
//!      Store/Notifier    │  PortfolioRiskBook
//!                        │
//!                 PositionMonitor ──► ExitEvaluator (pure)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let ledger = Arc::new(PositionLedger::new(gateway, store, book, notifier, clock));
//! let executor = OrderExecutor::new(Arc::clone(&ledger), ExecutionConfig::default());
//! let monitor = Arc::new(PositionMonitor::new(Arc::clone(&ledger), MonitorConfig::default()));
//!
//! let result = executor.execute(&candidate, &decision).await;
//! tokio::spawn(Arc::clone(&monitor).run(shutdown_rx));
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod headroom;
pub mod ledger;
pub mod monitor;

// Re-export main types
pub use config::{ExecutionConfig, LedgerConfig, MonitorConfig, TighteningTier};
pub use error::{ExecutionError, LedgerError, Result};
pub use execution::{ExecutionResult, ExecutionState, OrderExecutor};
pub use headroom::{HeadroomReport, adjust_headroom};
pub use ledger::{
    CloseOutcome, ExitFill, LedgerEntry, PositionLedger, ReconcileReport, ReduceKind,
    ReduceOutcome,
};
pub use monitor::{
    ExitAction, ExitEvaluator, MarketView, PositionMonitor, TickOutcome, TickPlan, TickReport,
    TrailingUpdate,
};
