//! Meridian Ports
//!
//! Port definitions (traits) for the Meridian trading control loop.
//! These define the boundaries between the engine and its collaborators:
//!
//! ```text
//!  CandidateSource ──► Orchestrator ──► Risk Gate ◄── CorrelationFilter
//!                                          │
//!                                          ▼
//!                          Execution / Ledger / Monitor ◄── FundingSignal
//!                                          │
//!                           ┌──────────────┴──────────────┐
//!                           ▼                             ▼
//!                     PositionStore                   Notifier
//! ```
//!
//! The exchange itself is behind `ExchangeGateway` in `meridian-gateway`.

mod clock;
mod correlation;
mod error;
mod funding;
mod notifier;
mod source;
mod store;

pub use clock::Clock;
pub use correlation::CorrelationFilter;
pub use error::{SourceError, StoreError, StoreResult};
pub use funding::{FundingInfo, FundingSignal};
pub use notifier::{EngineEvent, Notifier};
pub use source::{CandidateSource, ScoreAdjuster};
pub use store::PositionStore;
