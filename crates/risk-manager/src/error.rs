//! Risk manager errors

use meridian_core::{PositionId, ReservationId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid risk config: {0}")]
    InvalidConfig(String),

    #[error("Unknown reservation: {0}")]
    UnknownReservation(ReservationId),

    #[error("Unknown position: {0}")]
    UnknownPosition(PositionId),
}

pub type Result<T> = std::result::Result<T, Error>;
