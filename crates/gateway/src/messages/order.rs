//! Order message types

use meridian_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTypeWire {
    Limit,
    Market,
}

impl OrderTypeWire {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Market => "market",
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForceWire {
    /// Good Till Cancelled
    Gtc,
    /// Immediate Or Cancel
    Ioc,
    /// Rest on the book or be rejected (never takes liquidity)
    PostOnly,
}

impl TimeInForceWire {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "gtc",
            Self::Ioc => "ioc",
            Self::PostOnly => "post_only",
        }
    }
}

/// Order submission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-assigned order ID; the venue deduplicates on it
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderTypeWire,
    pub quantity: Decimal,
    /// Price (required for limit orders)
    pub price: Option<Decimal>,
    pub time_in_force: TimeInForceWire,
    /// Only ever decreases an existing position
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Post-only limit order (maker or nothing)
    pub fn post_only(
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderTypeWire::Limit,
            quantity,
            price: Some(price),
            time_in_force: TimeInForceWire::PostOnly,
            reduce_only: false,
        }
    }

    /// Market order
    pub fn market(
        client_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderTypeWire::Market,
            quantity,
            price: None,
            time_in_force: TimeInForceWire::Ioc, // Market orders are always IOC
            reduce_only: false,
        }
    }

    /// Mark the order reduce-only
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn is_post_only(&self) -> bool {
        self.time_in_force == TimeInForceWire::PostOnly
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatusWire {
    /// Resting on the book, nothing filled
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatusWire {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// One execution against an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub is_maker: bool,
}

impl Fill {
    pub fn new(price: Decimal, quantity: Decimal, is_maker: bool) -> Self {
        Self {
            price,
            quantity,
            is_maker,
        }
    }
}

/// Order state as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Venue-assigned order ID
    pub order_id: String,
    /// Client-assigned order ID (echoed back)
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatusWire,
    /// Quantity originally requested
    pub quantity: Decimal,
    /// Every fill so far, in execution order
    pub fills: Vec<Fill>,
}

impl OrderResult {
    /// Cumulative filled quantity
    pub fn filled_qty(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    /// Quantity still working (zero once terminal)
    pub fn remaining_qty(&self) -> Decimal {
        if self.is_terminal() {
            Decimal::ZERO
        } else {
            (self.quantity - self.filled_qty()).max(Decimal::ZERO)
        }
    }

    /// Volume-weighted average fill price
    pub fn avg_price(&self) -> Option<Decimal> {
        vwap(&self.fills)
    }

    /// Check if the order is terminal (no more updates expected)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatusWire::Rejected
                | OrderStatusWire::Filled
                | OrderStatusWire::Cancelled
                | OrderStatusWire::Expired
        )
    }
}

/// Volume-weighted average price of a set of fills
pub fn vwap(fills: &[Fill]) -> Option<Decimal> {
    let qty: Decimal = fills.iter().map(|f| f.quantity).sum();
    if qty.is_zero() {
        return None;
    }
    let notional: Decimal = fills.iter().map(|f| f.price * f.quantity).sum();
    Some(notional / qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_post_only_request() {
        let order = OrderRequest::post_only("c-1", "BTCUSDT", Side::Buy, dec!(1.0), dec!(50000));

        assert_eq!(order.order_type, OrderTypeWire::Limit);
        assert_eq!(order.price, Some(dec!(50000)));
        assert!(order.is_post_only());
        assert!(!order.reduce_only);
    }

    #[test]
    fn test_market_reduce_only() {
        let order = OrderRequest::market("c-2", "ETHUSDT", Side::Sell, dec!(10.0)).reduce_only();

        assert_eq!(order.order_type, OrderTypeWire::Market);
        assert!(order.price.is_none());
        assert_eq!(order.time_in_force, TimeInForceWire::Ioc);
        assert!(order.reduce_only);
    }

    #[test]
    fn test_result_fill_accounting() {
        let result = OrderResult {
            order_id: "1".into(),
            client_order_id: "c-1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            status: OrderStatusWire::PartiallyFilled,
            quantity: dec!(1),
            fills: vec![
                Fill::new(dec!(100.0), dec!(0.25), true),
                Fill::new(dec!(100.4), dec!(0.25), true),
            ],
        };

        assert_eq!(result.filled_qty(), dec!(0.5));
        assert_eq!(result.remaining_qty(), dec!(0.5));
        assert_eq!(result.avg_price(), Some(dec!(100.2)));
        assert!(!result.is_terminal());
    }

    #[test]
    fn test_vwap_of_nothing() {
        assert_eq!(vwap(&[]), None);
    }
}
