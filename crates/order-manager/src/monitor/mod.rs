//! Position Monitor
//!
//! Independent loop over the ledger. Every `tick_interval` each open position
//! is evaluated in its own task; a position whose previous tick is still
//! running is skipped rather than queued. A tick waits at most one interval
//! for its tasks, then leaves stragglers running in the background so one
//! stuck exit never holds back the checks on other positions.
//!
//! ```text
//!   interval ──► tick ──► JoinSet ─┬─► process(id) ─► mark ─► ExitEvaluator ─► TickPlan
//!                                  ├─► process(id)                               │
//!                                  └─► ...            ledger.update / reduce / close ◄┘
//! ```

mod evaluator;

pub use evaluator::{ExitAction, ExitEvaluator, MarketView, TickPlan, TrailingUpdate};

use dashmap::DashMap;
use log::{debug, info, warn};
use meridian_core::{ExitReason, PositionId, PositionStatus};
use meridian_ports::{EngineEvent, FundingSignal};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::MonitorConfig;
use crate::error::{LedgerError, Result};
use crate::ledger::{CloseOutcome, PositionLedger, ReduceKind};

/// What one tick did to one position
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Previous tick still running, or position gone
    Skipped,
    Held,
    /// Trailing or breakeven state changed
    Updated,
    PartialTakeProfit { quantity: Decimal, remaining: Decimal },
    Closed(ExitReason),
    Failed(String),
}

/// Summary of one monitor tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub evaluated: usize,
    pub skipped: usize,
    pub partials: usize,
    pub closed: Vec<(PositionId, ExitReason)>,
    pub failures: usize,
    /// Tasks still running when the tick stopped waiting
    pub in_flight: usize,
}

impl TickReport {
    fn record(&mut self, id: PositionId, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Skipped => self.skipped += 1,
            TickOutcome::Held | TickOutcome::Updated => self.evaluated += 1,
            TickOutcome::PartialTakeProfit { .. } => {
                self.evaluated += 1;
                self.partials += 1;
            }
            TickOutcome::Closed(reason) => {
                self.evaluated += 1;
                self.closed.push((id, reason));
            }
            TickOutcome::Failed(_) => self.failures += 1,
        }
    }
}

pub struct PositionMonitor {
    ledger: Arc<PositionLedger>,
    evaluator: ExitEvaluator,
    config: MonitorConfig,
    funding: Option<Arc<dyn FundingSignal>>,
    history: DashMap<PositionId, VecDeque<Decimal>>,
}

impl PositionMonitor {
    pub fn new(ledger: Arc<PositionLedger>, config: MonitorConfig) -> Self {
        let exit_fee_rate = ledger.fees().taker_fee;
        Self {
            evaluator: ExitEvaluator::new(config.clone(), exit_fee_rate),
            ledger,
            config,
            funding: None,
            history: DashMap::new(),
        }
    }

    pub fn with_funding(mut self, funding: Arc<dyn FundingSignal>) -> Self {
        self.funding = Some(funding);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    /// Tick until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("[MONITOR] Started (every {:?})", self.config.tick_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.closed.is_empty() || report.failures > 0 || report.in_flight > 0 {
                        debug!("[MONITOR] {:?}", report);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("[MONITOR] Stopped");
    }

    /// Evaluate every open position once, concurrently
    ///
    /// Waits up to one `tick_interval`; tasks still running after that are
    /// detached and keep their tick lock, so the next tick skips them.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let mut tasks = JoinSet::new();
        for id in self.ledger.ids() {
            let monitor = Arc::clone(self);
            tasks.spawn(async move { (id, monitor.process(id).await) });
        }

        let mut report = TickReport::default();
        let deadline = tokio::time::sleep(self.config.tick_interval());
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((id, outcome))) => report.record(id, outcome),
                    Some(Err(e)) => {
                        warn!("[MONITOR] Tick task aborted: {}", e);
                        report.failures += 1;
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    report.in_flight = tasks.len();
                    warn!(
                        "[MONITOR] {} position task(s) still running after {:?}; leaving them in flight",
                        report.in_flight,
                        self.config.tick_interval()
                    );
                    tasks.detach_all();
                    break;
                }
            }
        }

        self.history.retain(|id, _| self.ledger.contains(*id));
        report
    }

    /// One tick for one position
    pub async fn process(&self, id: PositionId) -> TickOutcome {
        let Some(entry) = self.ledger.entry(id) else {
            return TickOutcome::Skipped;
        };
        let Some(_tick) = entry.try_tick() else {
            debug!("[MONITOR] {} still busy, skipping", id);
            return TickOutcome::Skipped;
        };

        match self.evaluate_and_apply(id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("[MONITOR] {} tick failed: {}", id, e);
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    /// Operator close with `Manual`, waiting for any running tick first
    pub async fn force_close(&self, id: PositionId) -> Result<CloseOutcome> {
        let entry = self
            .ledger
            .entry(id)
            .ok_or(LedgerError::UnknownPosition(id))?;
        let _tick = entry.tick_lock().await;
        info!("[MONITOR] Force closing {}", id);
        self.ledger.close(id, ExitReason::Manual).await
    }

    /// Force close every open position; returns the ids closed
    pub async fn force_close_all(&self) -> Vec<PositionId> {
        let mut closed = Vec::new();
        for id in self.ledger.ids() {
            match self.force_close(id).await {
                Ok(outcome) if outcome.fully_closed => closed.push(id),
                Ok(_) => warn!("[MONITOR] {} only partially closed", id),
                Err(e) => warn!("[MONITOR] Force close of {} failed: {}", id, e),
            }
        }
        closed
    }

    async fn evaluate_and_apply(&self, id: PositionId) -> Result<TickOutcome> {
        let Some(position) = self.ledger.get(id).await else {
            return Ok(TickOutcome::Skipped);
        };
        if position.status != PositionStatus::Open {
            return Ok(TickOutcome::Skipped);
        }

        let price = self
            .ledger
            .gateway()
            .get_mark_price(&position.symbol)
            .await?;
        let recent_prices = self.record_price(id, price);
        let funding = match &self.funding {
            Some(signal) => signal.next_funding(&position.symbol).await,
            None => None,
        };
        let market = MarketView {
            price,
            recent_prices,
            funding,
            now: self.ledger.clock().now(),
        };

        let plan = self.evaluator.evaluate(&position, &market);
        if plan.is_noop() {
            return Ok(TickOutcome::Held);
        }

        let mut outcome = TickOutcome::Held;
        if plan.trailing.is_some() || plan.breakeven.is_some() {
            let trailing = plan.trailing.clone();
            let breakeven = plan.breakeven;
            let updated = self
                .ledger
                .update(id, |p| {
                    if let Some(update) = &trailing {
                        update.apply(p);
                    }
                    if let Some(price) = breakeven {
                        p.activate_breakeven(price);
                    }
                })
                .await?;

            if let Some(breakeven_price) = breakeven {
                info!(
                    "[MONITOR] {} breakeven at {} (stop {})",
                    updated.symbol, breakeven_price, updated.stop_loss_price
                );
                self.ledger.notifier().emit(&EngineEvent::BreakevenActivated {
                    position_id: id,
                    symbol: updated.symbol.clone(),
                    breakeven_price,
                });
            }
            if trailing.is_some() && !position.trailing_active {
                info!(
                    "[MONITOR] {} trailing active at {} (stop {:?})",
                    updated.symbol, price, updated.trailing_stop_price
                );
            }
            outcome = TickOutcome::Updated;
        }

        match plan.exit {
            None => Ok(outcome),
            Some(ExitAction::Close(reason)) => {
                info!(
                    "[MONITOR] {} {} at {} (pnl {})",
                    position.symbol,
                    reason,
                    price,
                    position.pnl_pct(price)
                );
                let closed = self.ledger.close(id, reason).await?;
                if closed.fully_closed {
                    Ok(TickOutcome::Closed(reason))
                } else {
                    Ok(TickOutcome::Updated)
                }
            }
            Some(ExitAction::PartialTakeProfit { levels, quantity }) => {
                let reduced = self
                    .ledger
                    .reduce(id, quantity, ReduceKind::TakeProfit { levels })
                    .await?;
                self.ledger.notifier().emit(&EngineEvent::PartialTakeProfit {
                    position_id: id,
                    symbol: position.symbol.clone(),
                    price: reduced.fill.price,
                    quantity: reduced.fill.quantity,
                    remaining: reduced.remaining,
                });
                info!(
                    "[MONITOR] {} take-profit {} level(s): {} @ {} (remaining {})",
                    position.symbol, levels, reduced.fill.quantity, reduced.fill.price, reduced.remaining
                );
                if reduced.closed {
                    Ok(TickOutcome::Closed(ExitReason::TakeProfit))
                } else {
                    Ok(TickOutcome::PartialTakeProfit {
                        quantity: reduced.fill.quantity,
                        remaining: reduced.remaining,
                    })
                }
            }
        }
    }

    fn record_price(&self, id: PositionId, price: Decimal) -> Vec<Decimal> {
        let keep = self.config.reversal_lookback_ticks.max(2);
        let mut prices = self.history.entry(id).or_default();
        prices.push_back(price);
        while prices.len() > keep {
            prices.pop_front();
        }
        prices.iter().copied().collect()
    }
}
