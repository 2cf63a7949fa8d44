//! Meridian Core Domain
//!
//! Pure domain types for the Meridian trading control loop.
//! This crate contains no async, no I/O, and is 100% unit testable.
//!
//! All percentages are fractions (`0.02` = 2%).

pub mod entities;
pub mod instruments;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Candidates produced by the external scorer
    CandidateError,
    ExitReason,
    // Fee types
    FeeSchedule,
    MarginMode,
    PortfolioRiskState,
    // Position lifecycle
    Position,
    PositionSide,
    PositionStatus,
    RegimeTag,
    RejectionReason,
    ReservationId,
    // Risk gate output
    RiskDecision,
    Side,
    TakeProfitLevel,
    TradeCandidate,
};
pub use instruments::SymbolRules;
pub use values::{PositionId, Price, Quantity, Symbol, Timestamp};
