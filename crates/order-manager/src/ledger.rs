//! Position Ledger
//!
//! The authoritative set of open positions. Each position sits behind its own
//! async mutex, so an exit, a headroom cut and a reconciliation pass touching
//! the same position run one after another while different positions proceed
//! in parallel. A second `tick_lock` per position lets the monitor skip a
//! position whose previous tick is still running.
//!
//! ```text
//!  Executor ──open──►┌──────────────────────────┐◄──reduce/close── Monitor
//!                    │ DashMap<id, LedgerEntry> │
//!  Reconciler ──────►│   Mutex<Position>        │──save──► PositionStore
//!                    │   Mutex<()> tick lock    │──emit──► Notifier
//!                    └────────────┬─────────────┘
//!                                 │ record_close / register_open
//!                                 ▼
//!                        PortfolioRiskBook
//! ```

use dashmap::DashMap;
use log::{info, warn};
use meridian_core::{
    ExitReason, FeeSchedule, Position, PositionId, PositionSide, PositionStatus,
};
use meridian_gateway::{ExchangeGateway, ExchangePosition, OrderRequest};
use meridian_ports::{Clock, EngineEvent, Notifier, PositionStore};
use meridian_risk_manager::PortfolioRiskBook;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};

/// One tracked position
pub struct LedgerEntry {
    symbol: String,
    position: Mutex<Position>,
    tick_lock: Mutex<()>,
}

impl LedgerEntry {
    fn new(position: Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            position: Mutex::new(position),
            tick_lock: Mutex::new(()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Claim this position for one monitor tick, or None if a tick is running
    pub fn try_tick(&self) -> Option<MutexGuard<'_, ()>> {
        self.tick_lock.try_lock().ok()
    }

    /// Wait for any running tick, then hold the position for the caller
    pub async fn tick_lock(&self) -> MutexGuard<'_, ()> {
        self.tick_lock.lock().await
    }
}

/// What a reduce-only order is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    /// Take profit on the first `levels` pending levels
    TakeProfit { levels: usize },
    /// Shrink a fresh position to restore liquidation headroom; never
    /// takes the whole position
    Headroom,
}

/// Execution of one exit order
#[derive(Debug, Clone, PartialEq)]
pub struct ExitFill {
    pub quantity: Decimal,
    /// VWAP of the order's fills
    pub price: Decimal,
    pub fee: Decimal,
    /// PnL realized by this piece, net of its fee
    pub pnl: Decimal,
}

/// Result of [`PositionLedger::reduce`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOutcome {
    pub fill: ExitFill,
    pub remaining: Decimal,
    /// The reduction consumed the whole position
    pub closed: bool,
}

/// Result of [`PositionLedger::close`]
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub fill: ExitFill,
    /// False when the venue filled only part of the close
    pub fully_closed: bool,
    pub position: Position,
}

/// Differences fixed by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub balance: Decimal,
    /// Exchange positions adopted into the ledger
    pub adopted: Vec<PositionId>,
    /// Ledger positions the exchange no longer holds
    pub closed: Vec<PositionId>,
    /// Ledger positions shrunk to the exchange quantity
    pub resized: Vec<PositionId>,
}

/// Authoritative store of open positions
pub struct PositionLedger {
    positions: DashMap<PositionId, Arc<LedgerEntry>>,
    archive: Mutex<VecDeque<Position>>,
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn PositionStore>,
    book: Arc<PortfolioRiskBook>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    fees: FeeSchedule,
    config: LedgerConfig,
    next_order: AtomicU64,
}

impl PositionLedger {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn PositionStore>,
        book: Arc<PortfolioRiskBook>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            positions: DashMap::new(),
            archive: Mutex::new(VecDeque::new()),
            gateway,
            store,
            book,
            notifier,
            clock,
            fees: FeeSchedule::default(),
            config: LedgerConfig::default(),
            next_order: AtomicU64::new(1),
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    pub fn book(&self) -> &Arc<PortfolioRiskBook> {
        &self.book
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, id: PositionId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<PositionId> {
        self.positions.iter().map(|e| *e.key()).collect()
    }

    pub fn entry(&self, id: PositionId) -> Option<Arc<LedgerEntry>> {
        self.positions.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of one position (waits for any in-flight order on it)
    pub async fn get(&self, id: PositionId) -> Option<Position> {
        let entry = self.entry(id)?;
        let position = entry.position.lock().await;
        Some(position.clone())
    }

    /// Snapshots of every tracked position, oldest first
    pub async fn open_positions(&self) -> Vec<Position> {
        let entries: Vec<Arc<LedgerEntry>> =
            self.positions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let position = entry.position.lock().await;
            if position.is_active() {
                out.push(position.clone());
            }
        }
        out.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.symbol.cmp(&b.symbol)));
        out
    }

    pub async fn find_by_symbol(&self, symbol: &str) -> Option<Position> {
        self.open_positions()
            .await
            .into_iter()
            .find(|p| p.symbol == symbol)
    }

    /// Recently closed positions, oldest first
    pub async fn closed_positions(&self) -> Vec<Position> {
        self.archive.lock().await.iter().cloned().collect()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start tracking a freshly filled position
    pub async fn open(&self, mut position: Position) -> PositionId {
        position.status = PositionStatus::Open;
        let id = position.id;
        self.persist(&mut position).await;
        info!(
            "[LEDGER] Opened {} {} {} @ {} ({})",
            position.side.as_str(),
            position.quantity,
            position.symbol,
            position.entry_price,
            id
        );
        self.positions.insert(id, Arc::new(LedgerEntry::new(position)));
        id
    }

    /// Apply a state change (stop ratchet, trailing, breakeven) and persist it
    pub async fn update<F>(&self, id: PositionId, f: F) -> Result<Position>
    where
        F: FnOnce(&mut Position),
    {
        let entry = self.entry(id).ok_or(LedgerError::UnknownPosition(id))?;
        let mut position = entry.position.lock().await;
        if position.status != PositionStatus::Open {
            return Err(LedgerError::NotOpen {
                id,
                status: position.status,
            });
        }
        f(&mut *position);
        self.persist(&mut position).await;
        Ok(position.clone())
    }

    /// Reduce a position with a reduce-only market order
    pub async fn reduce(
        &self,
        id: PositionId,
        quantity: Decimal,
        kind: ReduceKind,
    ) -> Result<ReduceOutcome> {
        let entry = self.entry(id).ok_or(LedgerError::UnknownPosition(id))?;
        let mut position = entry.position.lock().await;
        if position.status != PositionStatus::Open {
            return Err(LedgerError::NotOpen {
                id,
                status: position.status,
            });
        }
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(quantity.to_string()));
        }
        if kind == ReduceKind::Headroom && quantity >= position.quantity {
            return Err(LedgerError::InvalidQuantity(format!(
                "headroom cut {} would flatten {}",
                quantity, position.quantity
            )));
        }

        let quantity = quantity.min(position.quantity);
        position.status = PositionStatus::Reducing;
        let fill = match self.send_exit_order(&position, quantity).await {
            Ok(fill) => fill,
            Err(e) => {
                position.status = PositionStatus::Open;
                warn!("[LEDGER] Reduce {} failed: {}", id, e);
                return Err(e);
            }
        };

        let pnl = position.apply_exit_fill(fill.quantity, fill.price, fill.fee);
        let fill = ExitFill { pnl, ..fill };
        match kind {
            ReduceKind::TakeProfit { levels } => {
                if fill.quantity < quantity {
                    warn!(
                        "[LEDGER] Take-profit on {} filled {} of {}; rest of the level stays pending",
                        id, fill.quantity, quantity
                    );
                }
                position.record_take_profit_fill(levels, fill.quantity);
            }
            ReduceKind::Headroom => position.rebase_initial_quantity(),
        }

        if position.quantity.is_zero() {
            let pending = position.take_profit_levels.len();
            position.consume_take_profits(pending);
            self.finalize(&mut position, ExitReason::TakeProfit, fill.price)
                .await;
            return Ok(ReduceOutcome {
                fill,
                remaining: Decimal::ZERO,
                closed: true,
            });
        }

        position.status = PositionStatus::Open;
        self.persist(&mut position).await;
        info!(
            "[LEDGER] Reduced {} by {} @ {} (remaining {})",
            position.symbol, fill.quantity, fill.price, position.quantity
        );
        Ok(ReduceOutcome {
            fill,
            remaining: position.quantity,
            closed: false,
        })
    }

    /// Close the whole remaining quantity at market
    ///
    /// On failure the position returns to Open so the next tick retries.
    pub async fn close(&self, id: PositionId, reason: ExitReason) -> Result<CloseOutcome> {
        let entry = self.entry(id).ok_or(LedgerError::UnknownPosition(id))?;
        let mut position = entry.position.lock().await;
        if position.status != PositionStatus::Open {
            return Err(LedgerError::NotOpen {
                id,
                status: position.status,
            });
        }

        position.status = PositionStatus::Closing;
        let quantity = position.quantity;
        let fill = match self.send_exit_order(&position, quantity).await {
            Ok(fill) => fill,
            Err(e) => {
                position.status = PositionStatus::Open;
                warn!("[LEDGER] Close {} ({}) failed: {}", id, reason, e);
                return Err(e);
            }
        };

        let pnl = position.apply_exit_fill(fill.quantity, fill.price, fill.fee);
        let fill = ExitFill { pnl, ..fill };

        if position.quantity > Decimal::ZERO {
            position.status = PositionStatus::Open;
            position.rebase_initial_quantity();
            self.persist(&mut position).await;
            warn!(
                "[LEDGER] Close {} filled {} of {}, {} left open",
                id, fill.quantity, quantity, position.quantity
            );
            return Ok(CloseOutcome {
                fill,
                fully_closed: false,
                position: position.clone(),
            });
        }

        if reason == ExitReason::TakeProfit {
            let pending = position.take_profit_levels.len();
            position.consume_take_profits(pending);
        }
        self.finalize(&mut position, reason, fill.price).await;
        Ok(CloseOutcome {
            fill,
            fully_closed: true,
            position: position.clone(),
        })
    }

    /// Close every tracked position with `reason`; returns the ids closed
    pub async fn close_all(&self, reason: ExitReason) -> Vec<PositionId> {
        let mut closed = Vec::new();
        for id in self.ids() {
            match self.close(id, reason).await {
                Ok(outcome) if outcome.fully_closed => closed.push(id),
                Ok(_) => {}
                Err(e) => warn!("[LEDGER] {} close of {} failed: {}", reason, id, e),
            }
        }
        closed
    }

    // ========================================================================
    // Restore & reconciliation
    // ========================================================================

    /// Load persisted open positions and register their risk with the book
    pub async fn restore(&self) -> Result<usize> {
        let stored = self.store.load_open_positions().await?;
        let mut restored = 0;
        for mut position in stored {
            if !position.is_active() || position.quantity <= Decimal::ZERO {
                continue;
            }
            if self.contains(position.id) {
                continue;
            }
            // An interrupted reduce or close resumes as a plain open position
            position.status = PositionStatus::Open;
            self.book
                .register_open(position.id, &position.symbol, position.risk_pct)
                .await;
            info!(
                "[LEDGER] Restored {} {} {} ({})",
                position.side.as_str(),
                position.quantity,
                position.symbol,
                position.id
            );
            self.positions
                .insert(position.id, Arc::new(LedgerEntry::new(position)));
            restored += 1;
        }
        Ok(restored)
    }

    /// Align the ledger with the exchange, which is ground truth
    ///
    /// Ledger positions the exchange no longer holds close as
    /// `ExternalClose` at the mark price. Exchange positions the ledger does
    /// not know are adopted with a protective stop `ghost_stop_loss_pct`
    /// away from entry.
    ///
    /// Symbols the ledger holds before the account is read are never adopted,
    /// even if the monitor closes them while the snapshot is in flight.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut held = self.held_symbols();
        let account = self.gateway.get_account_state().await?;
        let mut report = ReconcileReport {
            balance: account.balance,
            ..Default::default()
        };

        let mut tracked = HashSet::new();
        for id in self.ids() {
            let Some(entry) = self.entry(id) else {
                continue;
            };
            let mut position = entry.position.lock().await;
            if !position.is_active() || !self.contains(id) {
                continue;
            }

            match account.position(&position.symbol) {
                Some(remote) if remote.side == position.side => {
                    tracked.insert(position.symbol.clone());
                    if remote.quantity < position.quantity {
                        warn!(
                            "[LEDGER] {} quantity {} on exchange, {} in ledger; shrinking",
                            position.symbol, remote.quantity, position.quantity
                        );
                        position.shrink_to(remote.quantity);
                        self.persist(&mut position).await;
                        report.resized.push(id);
                    }
                }
                _ => {
                    let price = match self.gateway.get_mark_price(&position.symbol).await {
                        Ok(mark) => mark,
                        Err(e) => {
                            warn!(
                                "[LEDGER] No mark for {} ({}); closing at entry",
                                position.symbol, e
                            );
                            position.entry_price
                        }
                    };
                    warn!(
                        "[LEDGER] {} ({}) missing on exchange; closing as {}",
                        position.symbol,
                        id,
                        ExitReason::ExternalClose
                    );
                    held.remove(&position.symbol);
                    let quantity = position.quantity;
                    position.apply_exit_fill(quantity, price, Decimal::ZERO);
                    self.finalize(&mut position, ExitReason::ExternalClose, price)
                        .await;
                    report.closed.push(id);
                }
            }
        }

        for remote in &account.open_positions {
            if tracked.contains(&remote.symbol) || remote.quantity <= Decimal::ZERO {
                continue;
            }
            if held.contains(&remote.symbol) {
                info!(
                    "[LEDGER] {} left the ledger during reconciliation; not adopting",
                    remote.symbol
                );
                continue;
            }
            let id = self.adopt(remote, account.balance).await;
            report.adopted.push(id);
        }

        if !report.adopted.is_empty() || !report.closed.is_empty() || !report.resized.is_empty()
        {
            info!(
                "[LEDGER] Reconciled: {} adopted, {} closed, {} resized",
                report.adopted.len(),
                report.closed.len(),
                report.resized.len()
            );
        }
        Ok(report)
    }

    async fn adopt(&self, remote: &ExchangePosition, balance: Decimal) -> PositionId {
        let entry = remote.entry_price;
        let offset = entry * self.config.ghost_stop_loss_pct;
        let stop = match remote.side {
            PositionSide::Long => entry - offset,
            PositionSide::Short => entry + offset,
        };
        let leverage = remote.leverage.max(Decimal::ONE);
        let risk_pct = if balance > Decimal::ZERO {
            remote.quantity * offset / (leverage * balance)
        } else {
            Decimal::ZERO
        };

        let mut position = Position::new(
            remote.symbol.clone(),
            remote.side,
            entry,
            remote.quantity,
            leverage,
            stop,
            Vec::new(),
        )
        .adopted()
        .with_risk_pct(risk_pct)
        .with_opened_at(self.clock.now());
        let id = position.id;

        warn!(
            "[LEDGER] Adopting {} {} {} @ {} with stop {}",
            remote.side.as_str(),
            remote.quantity,
            remote.symbol,
            entry,
            stop
        );
        self.book.register_open(id, &remote.symbol, risk_pct).await;
        self.persist(&mut position).await;
        self.positions.insert(id, Arc::new(LedgerEntry::new(position)));
        id
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn held_symbols(&self) -> HashSet<String> {
        self.positions
            .iter()
            .map(|e| e.value().symbol().to_string())
            .collect()
    }

    async fn send_exit_order(&self, position: &Position, quantity: Decimal) -> Result<ExitFill> {
        let n = self.next_order.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("exit-{}-{}", position.id.simple(), n);
        let request = OrderRequest::market(
            client_id,
            position.symbol.clone(),
            position.side.exit_side(),
            quantity,
        )
        .reduce_only();

        let result = self.gateway.place_order(request).await?;
        let filled = result.filled_qty();
        let price = match result.avg_price() {
            Some(price) if filled > Decimal::ZERO => price,
            _ => return Err(LedgerError::NothingFilled(position.id)),
        };
        let fee: Decimal = result
            .fills
            .iter()
            .map(|f| self.fees.calculate_fee(f.price * f.quantity, f.is_maker))
            .sum();
        Ok(ExitFill {
            quantity: filled,
            price,
            fee,
            pnl: Decimal::ZERO,
        })
    }

    /// Terminal bookkeeping shared by every full close
    async fn finalize(&self, position: &mut Position, reason: ExitReason, exit_price: Decimal) {
        let now = self.clock.now();
        position.mark_closed(reason, now);
        self.persist(position).await;

        if let Err(e) = self
            .book
            .record_close(position.id, position.realized_pnl, now)
            .await
        {
            warn!("[LEDGER] Risk book close for {} failed: {}", position.id, e);
        }

        self.notifier.emit(&EngineEvent::PositionClosed {
            position_id: position.id,
            symbol: position.symbol.clone(),
            reason,
            exit_price,
            realized_pnl: position.realized_pnl,
        });
        info!(
            "[LEDGER] Closed {} {} ({}) @ {} pnl={}",
            position.symbol, position.id, reason, exit_price, position.realized_pnl
        );

        self.positions.remove(&position.id);
        let mut archive = self.archive.lock().await;
        archive.push_back(position.clone());
        while archive.len() > self.config.archive_capacity {
            archive.pop_front();
        }
    }

    async fn persist(&self, position: &mut Position) {
        position.updated_at = self.clock.now();
        if let Err(e) = self.store.save(position).await {
            warn!("[LEDGER] Persisting {} failed: {}", position.id, e);
        }
    }
}
