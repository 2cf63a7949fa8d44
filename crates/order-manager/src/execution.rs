//! Order Execution Protocol
//!
//! Turns an approved [`RiskDecision`] into an open position, maker first:
//!
//! ```text
//!   QuoteLimit{0} ──timeout/cross──► QuoteLimit{1} ──► ... ──► FallbackMarket
//!        │                                 │                        │
//!        └──────────── filled ─────────────┴──────── filled ────────┴──► Filled
//!
//!   any permanent gateway error ─────────────────────────────────────► Failed
//! ```
//!
//! Each quote is a post-only limit for the quantity still missing. A quote
//! that rests past `order_timeout` is cancelled (keeping its partial fills)
//! and replaced closer to the latest mark. After `max_attempts` quotes the
//! remainder goes to the market. The reported price is the VWAP over every
//! fill of the execution.

use log::{debug, info, warn};
use meridian_core::{
    Position, PositionId, PositionSide, ReservationId, RiskDecision, SymbolRules, TradeCandidate,
};
use meridian_gateway::{ExchangeGateway, Fill, GatewayError, OrderRequest, OrderResult, vwap};
use meridian_ports::EngineEvent;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::error::ExecutionError;
use crate::headroom::{HeadroomReport, adjust_headroom};
use crate::ledger::PositionLedger;

/// States of one entry execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    /// Post-only quote number `attempt` at `price`
    QuoteLimit { attempt: u32, price: Decimal },
    /// Market order for whatever the quotes did not fill
    FallbackMarket,
    Filled,
    Failed(ExecutionError),
}

/// Outcome reported to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub symbol: String,
    pub success: bool,
    /// VWAP across all fills
    pub filled_price: Decimal,
    pub filled_quantity: Decimal,
    /// Every filled unit provided liquidity
    pub is_maker: bool,
    pub error: Option<ExecutionError>,
    pub position_id: Option<PositionId>,
    /// Post-fill headroom adjustment, when the entry filled
    pub headroom: Option<HeadroomReport>,
}

impl ExecutionResult {
    fn failed(symbol: &str, error: ExecutionError) -> Self {
        Self {
            symbol: symbol.to_string(),
            success: false,
            filled_price: Decimal::ZERO,
            filled_quantity: Decimal::ZERO,
            is_maker: false,
            error: Some(error),
            position_id: None,
            headroom: None,
        }
    }
}

/// Mutable bookkeeping for one execution
struct Execution<'a> {
    candidate: &'a TradeCandidate,
    target: Decimal,
    rules: SymbolRules,
    fills: Vec<Fill>,
    /// Quote still resting on the venue, if any
    working: Option<String>,
    tag: String,
    orders: u32,
}

impl<'a> Execution<'a> {
    fn new(candidate: &'a TradeCandidate, target: Decimal) -> Self {
        Self {
            candidate,
            target,
            rules: SymbolRules::new(candidate.symbol.clone()),
            fills: Vec::new(),
            working: None,
            tag: format!("entry-{}", Uuid::new_v4().simple()),
            orders: 0,
        }
    }

    fn symbol(&self) -> &str {
        &self.candidate.symbol
    }

    fn side(&self) -> PositionSide {
        self.candidate.side
    }

    fn filled(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    fn remaining(&self) -> Decimal {
        (self.target - self.filled()).max(Decimal::ZERO)
    }

    fn next_client_id(&mut self, kind: &str) -> String {
        self.orders += 1;
        format!("{}-{}{}", self.tag, kind, self.orders)
    }

    /// Take the fills of an order that will not fill any further
    fn record(&mut self, order: &OrderResult) {
        self.fills.extend(order.fills.iter().copied());
    }
}

/// Drives entries through the maker-first protocol
pub struct OrderExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    ledger: Arc<PositionLedger>,
    config: ExecutionConfig,
}

impl OrderExecutor {
    pub fn new(ledger: Arc<PositionLedger>, config: ExecutionConfig) -> Self {
        Self {
            gateway: Arc::clone(ledger.gateway()),
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute an approved, reserved decision
    ///
    /// On success the position is in the ledger and the reservation is
    /// committed; on failure the reservation is released and any partial
    /// fills are flattened.
    pub async fn execute(
        &self,
        candidate: &TradeCandidate,
        decision: &RiskDecision,
    ) -> ExecutionResult {
        let symbol = candidate.symbol.as_str();
        if !decision.approved {
            return ExecutionResult::failed(symbol, ExecutionError::NotApproved(symbol.to_string()));
        }
        let Some(reservation) = decision.reservation else {
            return ExecutionResult::failed(
                symbol,
                ExecutionError::MissingReservation(symbol.to_string()),
            );
        };

        info!(
            "[EXEC] {} {} {} x{} (score {})",
            candidate.side.as_str(),
            decision.adjusted_quantity,
            symbol,
            decision.adjusted_leverage,
            candidate.score
        );

        let mut execution = Execution::new(candidate, decision.adjusted_quantity);
        let outcome = tokio::time::timeout(
            self.config.execution_timeout(),
            self.run(&mut execution, decision.adjusted_leverage),
        )
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "[EXEC] {} exceeded {:?}",
                    symbol,
                    self.config.execution_timeout()
                );
                self.cancel_working(&mut execution).await;
                Err(ExecutionError::Timeout(symbol.to_string()))
            }
        };

        match result {
            Ok(()) => self.on_filled(&execution, decision, reservation).await,
            Err(error) => self.on_failed(&execution, reservation, error).await,
        }
    }

    /// Drive the state machine until Filled or Failed
    async fn run(&self, execution: &mut Execution<'_>, leverage: Decimal) -> Result<(), ExecutionError> {
        let symbol = execution.symbol().to_string();
        self.gateway.set_leverage(&symbol, leverage).await?;
        execution.rules = self.gateway.get_symbol_rules(&symbol).await?;

        let first_price = self.quote_price(
            execution.side(),
            execution.candidate.entry_price,
            0,
            &execution.rules,
        );
        let mut state = ExecutionState::QuoteLimit {
            attempt: 0,
            price: first_price,
        };

        loop {
            debug!("[EXEC] {} state {:?}", symbol, state);
            state = match state {
                ExecutionState::QuoteLimit { attempt, price } => {
                    self.quote(execution, attempt, price).await
                }
                ExecutionState::FallbackMarket => self.market(execution).await,
                ExecutionState::Filled => return Ok(()),
                ExecutionState::Failed(error) => return Err(error),
            };
        }
    }

    /// Price for quote `attempt` around `reference`, never crossing it
    pub fn quote_price(
        &self,
        side: PositionSide,
        reference: Decimal,
        attempt: u32,
        rules: &SymbolRules,
    ) -> Decimal {
        let offset = (self.config.maker_buffer_pct
            - self.config.price_improvement_pct * Decimal::from(attempt))
        .max(Decimal::ZERO);
        let entry_side = side.entry_side();
        match side {
            PositionSide::Long => {
                let price = rules.round_price_for(entry_side, reference * (Decimal::ONE - offset));
                if price >= reference {
                    rules.round_price_for(entry_side, reference - rules.tick_size)
                } else {
                    price
                }
            }
            PositionSide::Short => {
                let price = rules.round_price_for(entry_side, reference * (Decimal::ONE + offset));
                if price <= reference {
                    rules.round_price_for(entry_side, reference + rules.tick_size)
                } else {
                    price
                }
            }
        }
    }

    async fn quote(&self, execution: &mut Execution<'_>, attempt: u32, price: Decimal) -> ExecutionState {
        let remaining = execution.remaining();
        if remaining <= Decimal::ZERO {
            return ExecutionState::Filled;
        }

        let request = OrderRequest::post_only(
            execution.next_client_id("q"),
            execution.symbol(),
            execution.side().entry_side(),
            remaining,
            price,
        );
        let placed = match self.gateway.place_order(request).await {
            Ok(order) => order,
            Err(GatewayError::PostOnlyWouldCross) => {
                info!(
                    "[EXEC] {} quote {} @ {} would cross",
                    execution.symbol(),
                    attempt,
                    price
                );
                return self.next_quote(execution, attempt).await;
            }
            Err(e) => return ExecutionState::Failed(e.into()),
        };

        let settled = if placed.is_terminal() {
            placed
        } else {
            match self.await_quote(execution, placed).await {
                Ok(order) => order,
                Err(e) => return ExecutionState::Failed(e),
            }
        };
        execution.record(&settled);

        if execution.remaining() <= Decimal::ZERO {
            ExecutionState::Filled
        } else {
            self.next_quote(execution, attempt).await
        }
    }

    /// Poll a resting quote until it settles or times out, then cancel it
    async fn await_quote(
        &self,
        execution: &mut Execution<'_>,
        order: OrderResult,
    ) -> Result<OrderResult, ExecutionError> {
        let symbol = execution.symbol().to_string();
        execution.working = Some(order.order_id.clone());
        let deadline = Instant::now() + self.config.order_timeout();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
            let status = self.gateway.get_order(&symbol, &order.order_id).await?;
            if status.is_terminal() {
                execution.working = None;
                return Ok(status);
            }
        }

        info!(
            "[EXEC] {} quote {} timed out after {:?}",
            symbol,
            order.order_id,
            self.config.order_timeout()
        );
        let cancelled = match self.gateway.cancel_order(&symbol, &order.order_id).await {
            Ok(order) => order,
            Err(e) => {
                warn!("[EXEC] Cancel of {} failed: {}", order.order_id, e);
                self.gateway.get_order(&symbol, &order.order_id).await?
            }
        };
        execution.working = None;
        Ok(cancelled)
    }

    async fn next_quote(&self, execution: &mut Execution<'_>, attempt: u32) -> ExecutionState {
        let next = attempt + 1;
        if next >= self.config.max_attempts {
            info!(
                "[EXEC] {} falling back to market for {}",
                execution.symbol(),
                execution.remaining()
            );
            return ExecutionState::FallbackMarket;
        }
        match self.gateway.get_mark_price(execution.symbol()).await {
            Ok(reference) => ExecutionState::QuoteLimit {
                attempt: next,
                price: self.quote_price(execution.side(), reference, next, &execution.rules),
            },
            Err(e) => ExecutionState::Failed(e.into()),
        }
    }

    async fn market(&self, execution: &mut Execution<'_>) -> ExecutionState {
        let remaining = execution.remaining();
        if remaining <= Decimal::ZERO {
            return ExecutionState::Filled;
        }
        let request = OrderRequest::market(
            execution.next_client_id("m"),
            execution.symbol(),
            execution.side().entry_side(),
            remaining,
        );
        match self.gateway.place_order(request).await {
            Ok(order) => {
                execution.record(&order);
                if execution.filled() > Decimal::ZERO {
                    ExecutionState::Filled
                } else {
                    ExecutionState::Failed(ExecutionError::Unfilled(execution.symbol().to_string()))
                }
            }
            Err(e) => ExecutionState::Failed(e.into()),
        }
    }

    async fn cancel_working(&self, execution: &mut Execution<'_>) {
        let Some(order_id) = execution.working.take() else {
            return;
        };
        let symbol = execution.symbol().to_string();
        match self.gateway.cancel_order(&symbol, &order_id).await {
            Ok(order) => execution.record(&order),
            Err(e) => warn!("[EXEC] Cancel of {} after deadline failed: {}", order_id, e),
        }
    }

    async fn on_filled(
        &self,
        execution: &Execution<'_>,
        decision: &RiskDecision,
        reservation: ReservationId,
    ) -> ExecutionResult {
        let candidate = execution.candidate;
        let quantity = execution.filled();
        let price = vwap(&execution.fills).unwrap_or(candidate.entry_price);
        let is_maker = execution.fills.iter().all(|f| f.is_maker);

        let fees = self.ledger.fees();
        let fee_total: Decimal = execution
            .fills
            .iter()
            .map(|f| fees.calculate_fee(f.price * f.quantity, f.is_maker))
            .sum();
        let notional = price * quantity;
        let fee_rate = if notional > Decimal::ZERO {
            fee_total / notional
        } else {
            Decimal::ZERO
        };

        let position = Position::from_fill(candidate, price, quantity, decision.adjusted_leverage)
            .with_risk_pct(decision.risk_pct_used)
            .with_entry_fee(fee_rate)
            .with_opened_at(self.ledger.clock().now());
        let position_id = self.ledger.open(position).await;

        let book = self.ledger.book();
        if let Err(e) = book.commit(reservation, position_id).await {
            warn!("[EXEC] Commit of {} failed ({}); registering directly", reservation, e);
            book.register_open(position_id, &candidate.symbol, decision.risk_pct_used)
                .await;
        }

        self.ledger.notifier().emit(&EngineEvent::PositionOpened {
            position_id,
            symbol: candidate.symbol.clone(),
            side: candidate.side,
            entry_price: price,
            quantity,
            leverage: decision.adjusted_leverage,
            is_maker,
        });
        info!(
            "[EXEC] {} filled {} @ {} ({}, {} fills)",
            candidate.symbol,
            quantity,
            price,
            if is_maker { "maker" } else { "taker" },
            execution.fills.len()
        );

        let headroom = adjust_headroom(&self.ledger, position_id, &self.config).await;
        let filled_quantity = self
            .ledger
            .get(position_id)
            .await
            .map(|p| p.quantity)
            .unwrap_or(quantity);

        ExecutionResult {
            symbol: candidate.symbol.clone(),
            success: true,
            filled_price: price,
            filled_quantity,
            is_maker,
            error: None,
            position_id: Some(position_id),
            headroom: Some(headroom),
        }
    }

    async fn on_failed(
        &self,
        execution: &Execution<'_>,
        reservation: ReservationId,
        error: ExecutionError,
    ) -> ExecutionResult {
        let symbol = execution.symbol();
        let filled = execution.filled();
        if filled > Decimal::ZERO {
            self.flatten(execution, filled).await;
        }

        if let Err(e) = self.ledger.book().release(reservation).await {
            warn!("[EXEC] Release of {} failed: {}", reservation, e);
        }
        self.ledger.notifier().emit(&EngineEvent::ExecutionFailed {
            symbol: symbol.to_string(),
            error: error.to_string(),
        });
        warn!("[EXEC] {} failed: {}", symbol, error);
        ExecutionResult::failed(symbol, error)
    }

    /// Unwind fills of a failed execution
    async fn flatten(&self, execution: &Execution<'_>, quantity: Decimal) {
        let request = OrderRequest::market(
            format!("{}-flat", execution.tag),
            execution.symbol(),
            execution.side().exit_side(),
            quantity,
        )
        .reduce_only();
        match self.gateway.place_order(request).await {
            Ok(order) => info!(
                "[EXEC] Flattened {} of {} {}",
                order.filled_qty(),
                quantity,
                execution.symbol()
            ),
            Err(e) => warn!(
                "[EXEC] Flattening {} {} failed ({}); reconciliation will adopt it",
                quantity,
                execution.symbol(),
                e
            ),
        }
    }
}
