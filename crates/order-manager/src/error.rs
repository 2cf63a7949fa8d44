//! Order Manager errors

use meridian_core::{PositionId, PositionStatus};
use meridian_gateway::GatewayError;
use meridian_ports::StoreError;
use thiserror::Error;

/// Errors from ledger operations (open, reduce, close, reconcile)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Unknown position: {0}")]
    UnknownPosition(PositionId),

    #[error("Position {id} is {status:?}, expected Open")]
    NotOpen {
        id: PositionId,
        status: PositionStatus,
    },

    #[error("Invalid reduce quantity {0}")]
    InvalidQuantity(String),

    #[error("Exit order for {0} filled nothing")]
    NothingFilled(PositionId),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Why an entry execution failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Decision for {0} is not approved")]
    NotApproved(String),

    #[error("Decision for {0} carries no reservation")]
    MissingReservation(String),

    #[error("Nothing filled for {0}")]
    Unfilled(String),

    #[error("Execution for {0} exceeded its deadline")]
    Timeout(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
