//! Shared fixtures for the order manager integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use meridian_clock::ManualClock;
use meridian_core::{
    FeeSchedule, Position, PositionId, PositionSide, RiskDecision, Side, SymbolRules,
    TakeProfitLevel,
};
use meridian_gateway::{
    AccountState, ExchangeGateway, OrderRequest, OrderResult, PaperExchange, PositionRisk,
};
use meridian_order_manager::{LedgerConfig, PositionLedger};
use meridian_ports::{EngineEvent, Notifier, PositionStore, StoreResult};
use meridian_risk_manager::{PortfolioRiskBook, RiskConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SYMBOL: &str = "BTCUSDT";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

/// Notifier that keeps every event
#[derive(Default)]
pub struct Recorder(Mutex<Vec<EngineEvent>>);

impl Recorder {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|e| e.kind()).collect()
    }
}

impl Notifier for Recorder {
    fn emit(&self, event: &EngineEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// Position store backed by a map
#[derive(Default)]
pub struct MemoryStore(Mutex<HashMap<PositionId, Position>>);

impl MemoryStore {
    pub fn get(&self, id: PositionId) -> Option<Position> {
        self.0.lock().unwrap().get(&id).cloned()
    }

    pub fn insert(&self, position: Position) {
        self.0.lock().unwrap().insert(position.id, position);
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn save(&self, position: &Position) -> StoreResult<()> {
        self.insert(position.clone());
        Ok(())
    }

    async fn load_open_positions(&self) -> StoreResult<Vec<Position>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect())
    }
}

/// Paper venue wrapper that can stall selected calls
pub struct StallingGateway {
    pub venue: Arc<PaperExchange>,
    /// Wait this long after reading the account before returning it
    pub account_delay: Option<Duration>,
    /// Orders on this symbol never complete
    pub stalled_symbol: Option<String>,
}

impl StallingGateway {
    pub fn new(venue: Arc<PaperExchange>) -> Self {
        Self {
            venue,
            account_delay: None,
            stalled_symbol: None,
        }
    }

    pub fn with_account_delay(mut self, delay: Duration) -> Self {
        self.account_delay = Some(delay);
        self
    }

    pub fn with_stalled_orders(mut self, symbol: &str) -> Self {
        self.stalled_symbol = Some(symbol.to_string());
        self
    }
}

#[async_trait]
impl ExchangeGateway for StallingGateway {
    async fn place_order(&self, request: OrderRequest) -> meridian_gateway::Result<OrderResult> {
        if self.stalled_symbol.as_deref() == Some(request.symbol.as_str()) {
            std::future::pending::<()>().await;
        }
        self.venue.place_order(request).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> meridian_gateway::Result<OrderResult> {
        self.venue.cancel_order(symbol, order_id).await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> meridian_gateway::Result<OrderResult> {
        self.venue.get_order(symbol, order_id).await
    }

    async fn get_position_risk(&self, symbol: &str) -> meridian_gateway::Result<PositionRisk> {
        self.venue.get_position_risk(symbol).await
    }

    async fn get_account_state(&self) -> meridian_gateway::Result<AccountState> {
        let account = self.venue.get_account_state().await?;
        if let Some(delay) = self.account_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(account)
    }

    async fn get_mark_price(&self, symbol: &str) -> meridian_gateway::Result<Decimal> {
        self.venue.get_mark_price(symbol).await
    }

    async fn get_symbol_rules(&self, symbol: &str) -> meridian_gateway::Result<SymbolRules> {
        self.venue.get_symbol_rules(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> meridian_gateway::Result<()> {
        self.venue.set_leverage(symbol, leverage).await
    }
}

pub fn fees() -> FeeSchedule {
    FeeSchedule::new(dec!(0.0002), dec!(0.0005))
}

/// Paper venue, book, store and ledger wired together
pub struct Harness {
    pub venue: Arc<PaperExchange>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<Recorder>,
    pub store: Arc<MemoryStore>,
    pub book: Arc<PortfolioRiskBook>,
    pub ledger: Arc<PositionLedger>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_venue(PaperExchange::new(dec!(10000)).with_fees(fees()), fees()).await
    }

    /// `venue` gets BTCUSDT listed at 100
    pub async fn with_venue(venue: PaperExchange, fees: FeeSchedule) -> Self {
        Self::build(venue, fees, Arc::new(MemoryStore::default())).await
    }

    pub async fn build(venue: PaperExchange, fees: FeeSchedule, store: Arc<MemoryStore>) -> Self {
        Self::build_with_gateway(venue, fees, store, |venue| {
            venue as Arc<dyn ExchangeGateway>
        })
        .await
    }

    /// Ledger talks to the venue through whatever `wrap` returns
    pub async fn wrapped<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<PaperExchange>) -> Arc<dyn ExchangeGateway>,
    {
        Self::wrapped_venue(PaperExchange::new(dec!(10000)).with_fees(fees()), wrap).await
    }

    /// [`Harness::wrapped`] around a venue the caller configured
    pub async fn wrapped_venue<F>(venue: PaperExchange, wrap: F) -> Self
    where
        F: FnOnce(Arc<PaperExchange>) -> Arc<dyn ExchangeGateway>,
    {
        Self::build_with_gateway(venue, fees(), Arc::new(MemoryStore::default()), wrap).await
    }

    async fn build_with_gateway<F>(
        venue: PaperExchange,
        fees: FeeSchedule,
        store: Arc<MemoryStore>,
        wrap: F,
    ) -> Self
    where
        F: FnOnce(Arc<PaperExchange>) -> Arc<dyn ExchangeGateway>,
    {
        let _ = env_logger::try_init();
        venue.list_symbol(SYMBOL, dec!(100)).await;
        let venue = Arc::new(venue);
        let gateway = wrap(Arc::clone(&venue));
        let clock = ManualClock::new(Some(t0()));
        let events = Arc::new(Recorder::default());
        let book = Arc::new(
            PortfolioRiskBook::new(RiskConfig::default(), dec!(10000), t0())
                .with_notifier(events.clone()),
        );
        let ledger = Arc::new(
            PositionLedger::new(
                gateway,
                store.clone(),
                Arc::clone(&book),
                events.clone(),
                clock.clone(),
            )
            .with_fees(fees)
            .with_config(LedgerConfig::default()),
        );
        Self {
            venue,
            clock,
            events,
            store,
            book,
            ledger,
        }
    }

    /// Approved decision with a live reservation in the book
    pub async fn approved(&self, symbol: &str, quantity: Decimal, leverage: Decimal) -> RiskDecision {
        let risk = dec!(0.01);
        let reservation = self.book.lock().await.reserve(symbol, risk);
        RiskDecision::approve(symbol, quantity, leverage, risk).with_reservation(reservation)
    }

    /// Buy `quantity` at `entry` on the venue and track it in the ledger
    pub async fn open_long(
        &self,
        entry: Decimal,
        quantity: Decimal,
        stop: Decimal,
        take_profits: Vec<TakeProfitLevel>,
    ) -> PositionId {
        self.open_long_on(SYMBOL, entry, quantity, stop, take_profits)
            .await
    }

    /// [`Harness::open_long`] on any symbol (listed on first use)
    pub async fn open_long_on(
        &self,
        symbol: &str,
        entry: Decimal,
        quantity: Decimal,
        stop: Decimal,
        take_profits: Vec<TakeProfitLevel>,
    ) -> PositionId {
        self.venue.list_symbol(symbol, entry).await;
        let client_id = format!("seed-{}", uuid::Uuid::new_v4().simple());
        self.venue
            .place_order(OrderRequest::market(client_id, symbol, Side::Buy, quantity))
            .await
            .unwrap();

        let position = Position::new(
            symbol,
            PositionSide::Long,
            entry,
            quantity,
            dec!(5),
            stop,
            take_profits,
        )
        .with_entry_fee(fees().taker_fee)
        .with_risk_pct(dec!(0.01))
        .with_opened_at(t0());
        let id = self.ledger.open(position).await;
        self.book.register_open(id, symbol, dec!(0.01)).await;
        id
    }

    pub async fn orders(&self) -> Vec<OrderRequest> {
        self.venue.placed_orders().await
    }
}
