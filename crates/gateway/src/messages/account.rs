//! Account and position-risk message types

use meridian_core::PositionSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidation and mark price for a symbol's position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRisk {
    pub symbol: String,
    /// None when the venue holds no position for the symbol
    pub liquidation_price: Option<Decimal>,
    pub mark_price: Decimal,
}

impl PositionRisk {
    /// `|mark - liquidation| / entry`, or None without a liquidation price
    pub fn headroom_pct(&self, entry_price: Decimal) -> Option<Decimal> {
        let liq = self.liquidation_price?;
        if entry_price.is_zero() {
            return None;
        }
        Some((self.mark_price - liq).abs() / entry_price)
    }
}

/// A position as the venue reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
}

/// Account snapshot: balance plus every open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Wallet balance including realized PnL, in quote currency
    pub balance: Decimal,
    pub open_positions: Vec<ExchangePosition>,
}

impl AccountState {
    pub fn position(&self, symbol: &str) -> Option<&ExchangePosition> {
        self.open_positions.iter().find(|p| p.symbol == symbol)
    }
}
