//! Meridian Risk Manager
//!
//! Pre-trade risk control for the trading loop:
//!
//! - **Risk Gate**: validates, sizes and approves or rejects candidates
//! - **Portfolio Risk Book**: the one serialized owner of portfolio counters
//!   (reservations, committed risk, streaks, daily PnL, circuit breaker)
//! - **Correlation**: static pair tables and returns-based correlation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Risk Gate                             │
//! │                                                             │
//! │  Candidates ──► rank by score ──► evaluate ──► reserve      │
//! │                                      │            │         │
//! │                         CorrelationFilter         │         │
//! │                                                   ▼         │
//! │                                      PortfolioRiskBook      │
//! │                                      (tokio Mutex)          │
//! └───────────────────────────────────────────▲─────────────────┘
//!                                             │
//!                       commit / release / record_close
//!                                             │
//!                               Executor & Position Monitor
//! ```

pub mod book;
pub mod config;
pub mod correlation;
pub mod error;
pub mod gate;

// Re-export main types
pub use book::{BookInner, BreakerTrip, Committed, PortfolioRiskBook, Reservation};
pub use config::RiskConfig;
pub use correlation::{ReturnsCorrelation, StaticCorrelationMatrix, pearson};
pub use error::{Error, Result};
pub use gate::{BreakerAction, Evaluation, RiskGate};
