//! Error types for the gateway crate

use thiserror::Error;

/// Exchange gateway errors
///
/// Split into transient (safe to retry with backoff) and permanent
/// (retrying cannot help) via [`GatewayError::is_transient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    // --- transient ---
    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by venue")]
    RateLimited,

    #[error("Venue unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    // --- permanent ---
    #[error("Unknown symbol: {0}")]
    InvalidSymbol(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Post-only order would cross the book")]
    PostOnlyWouldCross,

    #[error("Order not found: {0}")]
    OrderNotFound(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout
                | GatewayError::RateLimited
                | GatewayError::Unavailable(_)
                | GatewayError::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
