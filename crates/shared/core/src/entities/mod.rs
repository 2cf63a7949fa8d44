mod candidate;
mod decision;
mod fee;
mod portfolio;
mod position;
mod side;

pub use candidate::{CandidateError, RegimeTag, TakeProfitLevel, TradeCandidate};
pub use decision::{RejectionReason, ReservationId, RiskDecision};
pub use fee::FeeSchedule;
pub use portfolio::PortfolioRiskState;
pub use position::{ExitReason, MarginMode, Position, PositionStatus};
pub use side::{PositionSide, Side};
