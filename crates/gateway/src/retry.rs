//! Retry with exponential backoff for transient gateway errors

use async_trait::async_trait;
use log::warn;
use meridian_core::SymbolRules;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::gateway::ExchangeGateway;
use crate::messages::account::{AccountState, PositionRisk};
use crate::messages::order::{OrderRequest, OrderResult};

/// Backoff schedule: `base_delay * 2^(attempt-1)`, capped at `max_delay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retry)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Gateway decorator that retries transient failures
///
/// Permanent errors are returned immediately. `place_order` is safe to
/// retry because venues deduplicate on `client_order_id`.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: ExchangeGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "[GATEWAY] {} failed ({}), retry {}/{} in {:?}",
                        op, e, attempt, self.policy.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<G: ExchangeGateway> ExchangeGateway for RetryingGateway<G> {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult> {
        self.with_retry("place_order", || self.inner.place_order(request.clone()))
            .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        self.with_retry("cancel_order", || self.inner.cancel_order(symbol, order_id))
            .await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        self.with_retry("get_order", || self.inner.get_order(symbol, order_id))
            .await
    }

    async fn get_position_risk(&self, symbol: &str) -> Result<PositionRisk> {
        self.with_retry("get_position_risk", || self.inner.get_position_risk(symbol))
            .await
    }

    async fn get_account_state(&self) -> Result<AccountState> {
        self.with_retry("get_account_state", || self.inner.get_account_state())
            .await
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal> {
        self.with_retry("get_mark_price", || self.inner.get_mark_price(symbol))
            .await
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        self.with_retry("get_symbol_rules", || self.inner.get_symbol_rules(symbol))
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<()> {
        self.with_retry("set_leverage", || self.inner.set_leverage(symbol, leverage))
            .await
    }
}
