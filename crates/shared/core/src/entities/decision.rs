use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why the risk gate refused a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    CircuitBreakerActive,
    DailyLossLimit,
    MaxPositionsReached,
    RiskPerTradeExceeded,
    CorrelationLimit,
    /// Candidate failed structural validation
    InvalidCandidate,
    /// Sized quantity falls under the venue's minimum quantity or notional
    BelowMinimumSize,
    /// An open position already exists for the symbol
    DuplicateSymbol,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitBreakerActive => "CIRCUIT_BREAKER_ACTIVE",
            Self::DailyLossLimit => "DAILY_LOSS_LIMIT",
            Self::MaxPositionsReached => "MAX_POSITIONS_REACHED",
            Self::RiskPerTradeExceeded => "RISK_PER_TRADE_EXCEEDED",
            Self::CorrelationLimit => "CORRELATION_LIMIT",
            Self::InvalidCandidate => "INVALID_CANDIDATE",
            Self::BelowMinimumSize => "BELOW_MINIMUM_SIZE",
            Self::DuplicateSymbol => "DUPLICATE_SYMBOL",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle for a provisional risk reservation held by the portfolio book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsv-{}", self.0)
    }
}

/// Output of the risk gate for one candidate
///
/// Created per evaluation and consumed immediately by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub symbol: String,
    pub approved: bool,
    pub adjusted_quantity: Decimal,
    pub adjusted_leverage: Decimal,
    pub rejection_reason: Option<RejectionReason>,
    /// Fraction of equity put at risk by this trade
    pub risk_pct_used: Decimal,
    /// Set once the decision has been reserved against the portfolio
    pub reservation: Option<ReservationId>,
}

impl RiskDecision {
    pub fn approve(
        symbol: impl Into<String>,
        quantity: Decimal,
        leverage: Decimal,
        risk_pct: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            approved: true,
            adjusted_quantity: quantity,
            adjusted_leverage: leverage,
            rejection_reason: None,
            risk_pct_used: risk_pct,
            reservation: None,
        }
    }

    pub fn reject(symbol: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            symbol: symbol.into(),
            approved: false,
            adjusted_quantity: Decimal::ZERO,
            adjusted_leverage: Decimal::ZERO,
            rejection_reason: Some(reason),
            risk_pct_used: Decimal::ZERO,
            reservation: None,
        }
    }

    pub fn with_reservation(mut self, reservation: ReservationId) -> Self {
        self.reservation = Some(reservation);
        self
    }
}
