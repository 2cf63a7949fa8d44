use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::entities::Side;
use crate::values::{Price, Quantity};

/// Trading rules the venue enforces for one symbol
///
/// Every order the engine sends is rounded through these rules first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolRules {
    pub symbol: String,
    /// Minimum price increment
    pub tick_size: Price,
    /// Minimum quantity increment
    pub step_size: Quantity,
    pub min_qty: Quantity,
    pub max_qty: Quantity,
    /// Minimum order value in quote currency
    pub min_notional: Decimal,
}

impl SymbolRules {
    /// Linear perpetual defaults: 0.01 tick, 0.001 step
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            max_qty: dec!(1000000),
            min_notional: dec!(5),
        }
    }

    pub fn with_tick_size(mut self, tick: Price) -> Self {
        self.tick_size = tick;
        self
    }

    pub fn with_step_size(mut self, step: Quantity) -> Self {
        self.step_size = step;
        self
    }

    pub fn with_min_qty(mut self, min_qty: Quantity) -> Self {
        self.min_qty = min_qty;
        self
    }

    pub fn with_max_qty(mut self, max_qty: Quantity) -> Self {
        self.max_qty = max_qty;
        self
    }

    pub fn with_min_notional(mut self, min_notional: Decimal) -> Self {
        self.min_notional = min_notional;
        self
    }

    /// Round a quantity down to the step size and cap at `max_qty`
    pub fn round_qty_down(&self, quantity: Quantity) -> Quantity {
        let qty = if self.step_size.is_zero() {
            quantity
        } else {
            (quantity / self.step_size).floor() * self.step_size
        };
        qty.min(self.max_qty).normalize()
    }

    pub fn round_price_down(&self, price: Price) -> Price {
        if self.tick_size.is_zero() {
            return price;
        }
        ((price / self.tick_size).floor() * self.tick_size).normalize()
    }

    pub fn round_price_up(&self, price: Price) -> Price {
        if self.tick_size.is_zero() {
            return price;
        }
        ((price / self.tick_size).ceil() * self.tick_size).normalize()
    }

    /// Round a limit price in the direction that favors the order's side
    ///
    /// Buys round down, sells round up, so a rounded maker quote never
    /// moves closer to the touch.
    pub fn round_price_for(&self, side: Side, price: Price) -> Price {
        match side {
            Side::Buy => self.round_price_down(price),
            Side::Sell => self.round_price_up(price),
        }
    }

    /// True if the quantity clears `min_qty` and the notional clears `min_notional`
    pub fn meets_minimums(&self, quantity: Quantity, price: Price) -> bool {
        quantity >= self.min_qty && quantity * price >= self.min_notional
    }
}
