use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fee structure for the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// Fee for maker orders (adds liquidity) - typically lower
    /// Can be negative for rebates
    pub maker_fee: Decimal,

    /// Fee for taker orders (removes liquidity) - typically higher
    pub taker_fee: Decimal,

    /// Minimum fee per trade (in quote currency)
    pub min_fee: Decimal,

    /// Maximum fee per trade (in quote currency, None = no max)
    pub max_fee: Option<Decimal>,
}

impl FeeSchedule {
    /// Create a new fee schedule
    pub fn new(maker_fee: Decimal, taker_fee: Decimal) -> Self {
        Self {
            maker_fee,
            taker_fee,
            min_fee: Decimal::ZERO,
            max_fee: None,
        }
    }

    /// Set minimum fee
    pub fn with_min_fee(mut self, min_fee: Decimal) -> Self {
        self.min_fee = min_fee;
        self
    }

    /// Set maximum fee
    pub fn with_max_fee(mut self, max_fee: Decimal) -> Self {
        self.max_fee = Some(max_fee);
        self
    }

    /// Fee rate for a fill
    pub fn rate(&self, is_maker: bool) -> Decimal {
        if is_maker {
            self.maker_fee
        } else {
            self.taker_fee
        }
    }

    /// Calculate fee for a trade
    pub fn calculate_fee(&self, notional: Decimal, is_maker: bool) -> Decimal {
        let fee = notional * self.rate(is_maker);

        // Rebates bypass min/max
        if fee >= Decimal::ZERO {
            let fee = fee.max(self.min_fee);
            match self.max_fee {
                Some(max) => fee.min(max),
                None => fee,
            }
        } else {
            fee
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_fee: Decimal::new(2, 4), // 0.02% maker
            taker_fee: Decimal::new(5, 4), // 0.05% taker
            min_fee: Decimal::ZERO,
            max_fee: None,
        }
    }
}
