//! Meridian Gateway
//!
//! The engine's only path to a derivatives venue. Provides:
//! - The [`ExchangeGateway`] port (orders, account state, position risk)
//! - Venue-neutral wire message types
//! - [`RetryingGateway`], a decorator retrying transient errors with
//!   exponential backoff
//! - [`PaperExchange`], an in-memory venue for dry runs and tests
//!
//! ## Architecture
//!
//! ```text
//!  Executor / Monitor / Reconciler
//!              │
//!     ┌────────▼────────┐
//!     │ RetryingGateway │  transient errors: backoff + retry
//!     └────────┬────────┘  permanent errors: returned as-is
//!              │
//!     ┌────────▼────────┐
//!     │ ExchangeGateway │  PaperExchange | live adapter
//!     └─────────────────┘
//! ```

pub mod adapters;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod retry;

// Re-export commonly used types
pub use adapters::{MakerFillMode, PaperExchange};
pub use error::{GatewayError, Result};
pub use gateway::ExchangeGateway;
pub use messages::{
    account::{AccountState, ExchangePosition, PositionRisk},
    order::{Fill, OrderRequest, OrderResult, OrderStatusWire, OrderTypeWire, TimeInForceWire, vwap},
};
pub use retry::{RetryPolicy, RetryingGateway};
