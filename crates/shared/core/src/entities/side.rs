use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Position side - long (bought) or short (sold)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    /// Long position - bought the asset, profit when price rises
    Long,
    /// Short position - sold borrowed asset, profit when price falls
    Short,
}

impl PositionSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Order side that opens (or adds to) a position on this side
    pub fn entry_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// Order side that reduces a position on this side
    pub fn exit_side(&self) -> Side {
        self.entry_side().opposite()
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Profit per unit moving from `entry` to `price`
    pub fn pnl_per_unit(&self, entry: Decimal, price: Decimal) -> Decimal {
        (price - entry) * self.sign()
    }

    /// True if `price` has reached `level` in the profitable direction
    pub fn reached(&self, price: Decimal, level: Decimal) -> bool {
        match self {
            PositionSide::Long => price >= level,
            PositionSide::Short => price <= level,
        }
    }

    /// True if `price` has crossed `level` against the position
    pub fn crossed_against(&self, price: Decimal, level: Decimal) -> bool {
        match self {
            PositionSide::Long => price <= level,
            PositionSide::Short => price >= level,
        }
    }

    /// True if `candidate` is a more favorable stop than `current`
    pub fn is_tighter_stop(&self, candidate: Decimal, current: Decimal) -> bool {
        match self {
            PositionSide::Long => candidate > current,
            PositionSide::Short => candidate < current,
        }
    }

    /// The more favorable of two prices for this side (higher for long)
    pub fn better(&self, a: Decimal, b: Decimal) -> Decimal {
        match self {
            PositionSide::Long => a.max(b),
            PositionSide::Short => a.min(b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}
