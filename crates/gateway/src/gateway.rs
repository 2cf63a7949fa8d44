//! The exchange port

use async_trait::async_trait;
use meridian_core::SymbolRules;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::messages::account::{AccountState, PositionRisk};
use crate::messages::order::{OrderRequest, OrderResult};

/// Everything the engine needs from a derivatives venue
///
/// Implementations must deduplicate `place_order` on `client_order_id` so a
/// retried submission never creates a second order.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult>;

    /// Cancel a working order; returns the final state including any fills
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult>;

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult>;

    async fn get_position_risk(&self, symbol: &str) -> Result<PositionRisk>;

    async fn get_account_state(&self) -> Result<AccountState>;

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules>;

    /// Set the leverage used for new exposure on `symbol`
    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<()>;
}

#[async_trait]
impl<G: ExchangeGateway + ?Sized> ExchangeGateway for std::sync::Arc<G> {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult> {
        (**self).place_order(request).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        (**self).cancel_order(symbol, order_id).await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        (**self).get_order(symbol, order_id).await
    }

    async fn get_position_risk(&self, symbol: &str) -> Result<PositionRisk> {
        (**self).get_position_risk(symbol).await
    }

    async fn get_account_state(&self) -> Result<AccountState> {
        (**self).get_account_state().await
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal> {
        (**self).get_mark_price(symbol).await
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        (**self).get_symbol_rules(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<()> {
        (**self).set_leverage(symbol, leverage).await
    }
}
