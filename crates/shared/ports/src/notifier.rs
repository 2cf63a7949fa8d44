use meridian_core::{ExitReason, PositionId, PositionSide, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle events published to the notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PositionOpened {
        position_id: PositionId,
        symbol: String,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: Decimal,
        is_maker: bool,
    },
    PartialTakeProfit {
        position_id: PositionId,
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        remaining: Decimal,
    },
    BreakevenActivated {
        position_id: PositionId,
        symbol: String,
        breakeven_price: Decimal,
    },
    HeadroomReduced {
        position_id: PositionId,
        symbol: String,
        quantity: Decimal,
        headroom_pct: Decimal,
    },
    PositionClosed {
        position_id: PositionId,
        symbol: String,
        reason: ExitReason,
        exit_price: Decimal,
        realized_pnl: Decimal,
    },
    CircuitBreakerTripped {
        reason: String,
        until: Timestamp,
    },
    ExecutionFailed {
        symbol: String,
        error: String,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "position_opened",
            Self::PartialTakeProfit { .. } => "partial_take_profit",
            Self::BreakevenActivated { .. } => "breakeven_activated",
            Self::HeadroomReduced { .. } => "headroom_reduced",
            Self::PositionClosed { .. } => "position_closed",
            Self::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

/// Port for outbound notifications
///
/// Fire-and-forget: implementations swallow their own failures and must
/// not block the caller.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}
