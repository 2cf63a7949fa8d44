//! Paper venue - an in-memory exchange for dry runs and tests
//!
//! Fills are synthetic: post-only quotes fill according to a configurable
//! [`MakerFillMode`], market orders fill at the mark price or along a scripted
//! list of slices. Positions, balance and liquidation prices are tracked so
//! reconciliation and headroom logic see a coherent account.

use async_trait::async_trait;
use log::{debug, info};
use meridian_core::{FeeSchedule, PositionSide, Side, SymbolRules};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::gateway::ExchangeGateway;
use crate::messages::account::{AccountState, ExchangePosition, PositionRisk};
use crate::messages::order::{
    Fill, OrderRequest, OrderResult, OrderStatusWire, OrderTypeWire,
};

/// How resting post-only orders get filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakerFillMode {
    /// Fill in full as soon as the order rests
    Immediate,
    /// Never fill (the quote times out)
    Never,
    /// Fill in full on the n-th status poll
    AfterPolls(u32),
    /// Fill this fraction immediately, never the rest
    Partial(Decimal),
}

#[derive(Debug, Clone)]
struct PaperOrder {
    result: OrderResult,
    limit_price: Option<Decimal>,
    reduce_only: bool,
    polls: u32,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: PositionSide,
    quantity: Decimal,
    entry_price: Decimal,
    leverage: Decimal,
}

struct PaperState {
    balance: Decimal,
    marks: HashMap<String, Decimal>,
    rules: HashMap<String, SymbolRules>,
    leverage: HashMap<String, Decimal>,
    positions: HashMap<String, PaperPosition>,
    orders: HashMap<String, PaperOrder>,
    by_client_id: HashMap<String, String>,
    liquidation_overrides: HashMap<String, Decimal>,
    market_scripts: HashMap<String, VecDeque<Vec<(Decimal, Decimal)>>>,
    failures: VecDeque<GatewayError>,
    order_failures: VecDeque<(OrderTypeWire, GatewayError)>,
    placed: Vec<OrderRequest>,
    maker_mode: MakerFillMode,
    fees: FeeSchedule,
    maintenance_margin_rate: Decimal,
    next_id: u64,
}

/// In-memory exchange implementing [`ExchangeGateway`]
pub struct PaperExchange {
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(balance: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                balance,
                marks: HashMap::new(),
                rules: HashMap::new(),
                leverage: HashMap::new(),
                positions: HashMap::new(),
                orders: HashMap::new(),
                by_client_id: HashMap::new(),
                liquidation_overrides: HashMap::new(),
                market_scripts: HashMap::new(),
                failures: VecDeque::new(),
                order_failures: VecDeque::new(),
                placed: Vec::new(),
                maker_mode: MakerFillMode::Immediate,
                fees: FeeSchedule::default(),
                maintenance_margin_rate: dec!(0.005),
                next_id: 1,
            }),
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.state.get_mut().fees = fees;
        self
    }

    pub fn with_maker_fill_mode(mut self, mode: MakerFillMode) -> Self {
        self.state.get_mut().maker_mode = mode;
        self
    }

    pub fn with_maintenance_margin_rate(mut self, rate: Decimal) -> Self {
        self.state.get_mut().maintenance_margin_rate = rate;
        self
    }

    /// List a symbol with default rules at `mark`
    pub async fn list_symbol(&self, symbol: &str, mark: Decimal) {
        let mut state = self.state.lock().await;
        state.marks.insert(symbol.to_string(), mark);
        state
            .rules
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolRules::new(symbol));
    }

    pub async fn set_mark_price(&self, symbol: &str, mark: Decimal) {
        self.state.lock().await.marks.insert(symbol.to_string(), mark);
    }

    pub async fn set_symbol_rules(&self, rules: SymbolRules) {
        self.state
            .lock()
            .await
            .rules
            .insert(rules.symbol.clone(), rules);
    }

    pub async fn set_maker_fill_mode(&self, mode: MakerFillMode) {
        self.state.lock().await.maker_mode = mode;
    }

    /// Pin the reported liquidation price for a symbol
    pub async fn set_liquidation_price(&self, symbol: &str, price: Decimal) {
        self.state
            .lock()
            .await
            .liquidation_overrides
            .insert(symbol.to_string(), price);
    }

    pub async fn clear_liquidation_price(&self, symbol: &str) {
        self.state.lock().await.liquidation_overrides.remove(symbol);
    }

    /// Script the next market order on `symbol` to fill in these `(price, qty)` slices
    pub async fn script_market_fills(&self, symbol: &str, slices: Vec<(Decimal, Decimal)>) {
        self.state
            .lock()
            .await
            .market_scripts
            .entry(symbol.to_string())
            .or_default()
            .push_back(slices);
    }

    /// Make the next gateway call fail with `error`
    pub async fn fail_next(&self, error: GatewayError) {
        self.state.lock().await.failures.push_back(error);
    }

    /// Make the next order of `order_type` fail with `error`; other calls pass
    pub async fn fail_next_order(&self, order_type: OrderTypeWire, error: GatewayError) {
        self.state
            .lock()
            .await
            .order_failures
            .push_back((order_type, error));
    }

    /// Seed a position that exists on the venue only
    pub async fn seed_position(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: Decimal,
    ) {
        let mut state = self.state.lock().await;
        state.marks.entry(symbol.to_string()).or_insert(entry_price);
        state
            .rules
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolRules::new(symbol));
        state.positions.insert(
            symbol.to_string(),
            PaperPosition {
                side,
                quantity,
                entry_price,
                leverage,
            },
        );
    }

    /// Drop a position as if it was closed outside the engine
    pub async fn remove_position(&self, symbol: &str) {
        self.state.lock().await.positions.remove(symbol);
    }

    pub async fn position_quantity(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .await
            .positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn balance(&self) -> Decimal {
        self.state.lock().await.balance
    }

    /// Every order request accepted for processing, in order
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.placed.clone()
    }
}

impl PaperState {
    fn take_failure(&mut self) -> Result<()> {
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn take_order_failure(&mut self, order_type: OrderTypeWire) -> Result<()> {
        match self.order_failures.front() {
            Some((kind, _)) if *kind == order_type => match self.order_failures.pop_front() {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn mark(&self, symbol: &str) -> Result<Decimal> {
        self.marks
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::InvalidSymbol(symbol.to_string()))
    }

    fn next_order_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("paper-{id}")
    }

    /// Cap a reduce-only quantity at the opposing position, or reject
    fn reduce_only_cap(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<Decimal> {
        match self.positions.get(symbol) {
            Some(pos) if pos.side.exit_side() == side => Ok(quantity.min(pos.quantity)),
            _ => Err(GatewayError::Rejected(
                "reduce-only order would increase position".to_string(),
            )),
        }
    }

    /// Book a fill against the account
    fn apply_fill(&mut self, symbol: &str, side: Side, fill: &Fill) {
        let fee = self.fees.calculate_fee(fill.price * fill.quantity, fill.is_maker);
        self.balance -= fee;

        let leverage = self.leverage.get(symbol).copied().unwrap_or(Decimal::ONE);
        let fill_side = match side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        };

        let Some(pos) = self.positions.get_mut(symbol) else {
            self.positions.insert(
                symbol.to_string(),
                PaperPosition {
                    side: fill_side,
                    quantity: fill.quantity,
                    entry_price: fill.price,
                    leverage,
                },
            );
            return;
        };

        if pos.side == fill_side {
            let notional = pos.quantity * pos.entry_price + fill.quantity * fill.price;
            pos.quantity += fill.quantity;
            pos.entry_price = notional / pos.quantity;
            return;
        }

        let closed = fill.quantity.min(pos.quantity);
        let pnl = pos.side.pnl_per_unit(pos.entry_price, fill.price) * closed;
        pos.quantity -= closed;
        self.balance += pnl;

        let flipped = fill.quantity - closed;
        if pos.quantity.is_zero() {
            self.positions.remove(symbol);
            if flipped > Decimal::ZERO {
                self.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        side: fill_side,
                        quantity: flipped,
                        entry_price: fill.price,
                        leverage,
                    },
                );
            }
        }
    }

    fn record_fills(&mut self, order_id: &str, fills: Vec<Fill>) {
        let Some(order) = self.orders.get(order_id) else {
            return;
        };
        let symbol = order.result.symbol.clone();
        let side = order.result.side;
        for fill in &fills {
            self.apply_fill(&symbol, side, fill);
        }
        if let Some(order) = self.orders.get_mut(order_id) {
            order.result.fills.extend(fills);
            order.result.status = if order.result.filled_qty() >= order.result.quantity {
                OrderStatusWire::Filled
            } else if order.result.filled_qty() > Decimal::ZERO {
                OrderStatusWire::PartiallyFilled
            } else {
                order.result.status
            };
        }
    }

    /// Fill the rest of a resting maker order at its limit price
    fn fill_resting(&mut self, order_id: &str) {
        let Some(order) = self.orders.get(order_id) else {
            return;
        };
        if order.result.is_terminal() {
            return;
        }
        let Some(price) = order.limit_price else {
            return;
        };
        let mut remaining = order.result.quantity - order.result.filled_qty();
        if order.reduce_only {
            let symbol = order.result.symbol.clone();
            match self.reduce_only_cap(&symbol, order.result.side, remaining) {
                Ok(cap) => remaining = cap,
                Err(_) => return,
            }
        }
        if remaining > Decimal::ZERO {
            self.record_fills(order_id, vec![Fill::new(price, remaining, true)]);
        }
    }

    fn liquidation_price(&self, symbol: &str) -> Option<Decimal> {
        if let Some(price) = self.liquidation_overrides.get(symbol) {
            return Some(*price);
        }
        let pos = self.positions.get(symbol)?;
        if pos.quantity.is_zero() {
            return None;
        }
        // Wallet-backed: the whole balance margins the position.
        let cushion = self.balance / pos.quantity;
        let maintenance = pos.entry_price * self.maintenance_margin_rate;
        let price = match pos.side {
            PositionSide::Long => pos.entry_price - cushion + maintenance,
            PositionSide::Short => pos.entry_price + cushion - maintenance,
        };
        Some(price.max(Decimal::ZERO))
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state.take_order_failure(request.order_type)?;

        if let Some(existing) = state.by_client_id.get(&request.client_order_id) {
            if let Some(order) = state.orders.get(existing) {
                debug!("[PAPER] duplicate client id {}", request.client_order_id);
                return Ok(order.result.clone());
            }
        }

        let mark = state.mark(&request.symbol)?;
        if request.quantity <= Decimal::ZERO {
            return Err(GatewayError::Rejected("quantity must be positive".into()));
        }

        let quantity = if request.reduce_only {
            state.reduce_only_cap(&request.symbol, request.side, request.quantity)?
        } else {
            request.quantity
        };

        let limit_price = match request.order_type {
            OrderTypeWire::Limit => {
                let price = request
                    .price
                    .ok_or_else(|| GatewayError::Rejected("limit order without price".into()))?;
                let crosses = match request.side {
                    Side::Buy => price >= mark,
                    Side::Sell => price <= mark,
                };
                if crosses && request.is_post_only() {
                    return Err(GatewayError::PostOnlyWouldCross);
                }
                Some(price)
            }
            OrderTypeWire::Market => None,
        };

        let order_id = state.next_order_id();
        state.placed.push(request.clone());
        state
            .by_client_id
            .insert(request.client_order_id.clone(), order_id.clone());
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                result: OrderResult {
                    order_id: order_id.clone(),
                    client_order_id: request.client_order_id.clone(),
                    symbol: request.symbol.clone(),
                    side: request.side,
                    status: OrderStatusWire::New,
                    quantity,
                    fills: Vec::new(),
                },
                limit_price,
                reduce_only: request.reduce_only,
                polls: 0,
            },
        );

        match request.order_type {
            OrderTypeWire::Market => {
                let mut fills = Vec::new();
                let mut left = quantity;
                if let Some(slices) = state
                    .market_scripts
                    .get_mut(&request.symbol)
                    .and_then(|queue| queue.pop_front())
                {
                    for (price, qty) in slices {
                        if left.is_zero() {
                            break;
                        }
                        let take = qty.min(left);
                        fills.push(Fill::new(price, take, false));
                        left -= take;
                    }
                }
                if left > Decimal::ZERO {
                    fills.push(Fill::new(mark, left, false));
                }
                state.record_fills(&order_id, fills);
            }
            OrderTypeWire::Limit => match state.maker_mode {
                MakerFillMode::Immediate => state.fill_resting(&order_id),
                MakerFillMode::Partial(fraction) => {
                    let qty = quantity * fraction;
                    if let (Some(price), true) = (limit_price, qty > Decimal::ZERO) {
                        state.record_fills(&order_id, vec![Fill::new(price, qty, true)]);
                    }
                }
                MakerFillMode::Never | MakerFillMode::AfterPolls(_) => {}
            },
        }

        let result = state
            .orders
            .get(&order_id)
            .map(|o| o.result.clone())
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.clone()))?;
        info!(
            "[PAPER] {} {} {} {} -> {} filled {}",
            result.order_id,
            request.order_type.as_str(),
            request.side.as_str(),
            request.symbol,
            result.status.as_str(),
            result.filled_qty()
        );
        Ok(result)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<OrderResult> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;
        if !order.result.is_terminal() {
            order.result.status = OrderStatusWire::Cancelled;
        }
        Ok(order.result.clone())
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> Result<OrderResult> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let mode = state.maker_mode;
        let polls = {
            let order = state
                .orders
                .get_mut(order_id)
                .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;
            order.polls += 1;
            order.polls
        };
        if let MakerFillMode::AfterPolls(n) = mode {
            if polls >= n {
                state.fill_resting(order_id);
            }
        }
        state
            .orders
            .get(order_id)
            .map(|o| o.result.clone())
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))
    }

    async fn get_position_risk(&self, symbol: &str) -> Result<PositionRisk> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let mark_price = state.mark(symbol)?;
        Ok(PositionRisk {
            symbol: symbol.to_string(),
            liquidation_price: state.liquidation_price(symbol),
            mark_price,
        })
    }

    async fn get_account_state(&self) -> Result<AccountState> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let mut open_positions: Vec<ExchangePosition> = state
            .positions
            .iter()
            .filter(|(_, p)| p.quantity > Decimal::ZERO)
            .map(|(symbol, p)| ExchangePosition {
                symbol: symbol.clone(),
                side: p.side,
                quantity: p.quantity,
                entry_price: p.entry_price,
                leverage: p.leverage,
            })
            .collect();
        open_positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(AccountState {
            balance: state.balance,
            open_positions,
        })
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state.mark(symbol)
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state
            .rules
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidSymbol(symbol.to_string()))
    }

    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<()> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state.mark(symbol)?;
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }
}
