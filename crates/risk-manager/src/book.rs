//! Portfolio Risk Book
//!
//! The single owner of [`PortfolioRiskState`]. Every mutation (reservation,
//! commit, release, close accounting, equity and day rollover) happens under
//! one async mutex, so the gate's read-check-reserve sequence is atomic with
//! respect to concurrent closes from the position monitor.

use chrono::{DateTime, Utc};
use log::{info, warn};
use meridian_core::{PortfolioRiskState, PositionId, ReservationId};
use meridian_ports::{EngineEvent, Notifier};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::RiskConfig;
use crate::error::{Error, Result};

/// Risk held for an entry that has not filled yet
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub symbol: String,
    pub risk_pct: Decimal,
}

/// Risk attributed to an open position
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub symbol: String,
    pub risk_pct: Decimal,
}

/// Book contents guarded by the mutex
#[derive(Debug)]
pub struct BookInner {
    pub state: PortfolioRiskState,
    pub reservations: HashMap<ReservationId, Reservation>,
    pub committed: HashMap<PositionId, Committed>,
}

impl BookInner {
    /// Symbols with an open position or an outstanding reservation
    pub fn exposed_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .committed
            .values()
            .map(|c| c.symbol.clone())
            .chain(self.reservations.values().map(|r| r.symbol.clone()))
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Record a reservation; it counts as a position and as committed risk
    pub fn reserve(&mut self, symbol: &str, risk_pct: Decimal) -> ReservationId {
        let id = ReservationId::new();
        self.reservations.insert(
            id,
            Reservation {
                symbol: symbol.to_string(),
                risk_pct,
            },
        );
        self.state.open_positions_count += 1;
        self.state.total_risk_pct_committed += risk_pct;
        id
    }

    fn recount(&mut self) {
        self.state.open_positions_count = self.committed.len() + self.reservations.len();
        self.state.total_risk_pct_committed = self
            .committed
            .values()
            .map(|c| c.risk_pct)
            .chain(self.reservations.values().map(|r| r.risk_pct))
            .sum();
    }
}

/// Circuit breaker trip produced by close accounting
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerTrip {
    pub reason: String,
    pub until: DateTime<Utc>,
}

/// Serialized owner of the portfolio risk state
pub struct PortfolioRiskBook {
    config: RiskConfig,
    inner: Mutex<BookInner>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PortfolioRiskBook {
    pub fn new(config: RiskConfig, account_equity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            config,
            inner: Mutex::new(BookInner {
                state: PortfolioRiskState::new(account_equity, now),
                reservations: HashMap::new(),
                committed: HashMap::new(),
            }),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Exclusive access for a multi-step check (used by the risk gate)
    pub async fn lock(&self) -> MutexGuard<'_, BookInner> {
        self.inner.lock().await
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> PortfolioRiskState {
        self.inner.lock().await.state.clone()
    }

    pub async fn has_exposure(&self, symbol: &str) -> bool {
        self.inner
            .lock()
            .await
            .exposed_symbols()
            .iter()
            .any(|s| s == symbol)
    }

    /// Turn a reservation into an open position's committed risk
    pub async fn commit(&self, reservation: ReservationId, position_id: PositionId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let held = inner
            .reservations
            .remove(&reservation)
            .ok_or(Error::UnknownReservation(reservation))?;
        info!(
            "[RISK] {} committed {} for {} ({})",
            reservation, held.risk_pct, held.symbol, position_id
        );
        inner.committed.insert(
            position_id,
            Committed {
                symbol: held.symbol,
                risk_pct: held.risk_pct,
            },
        );
        inner.recount();
        Ok(())
    }

    /// Drop a reservation whose entry did not fill
    pub async fn release(&self, reservation: ReservationId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let held = inner
            .reservations
            .remove(&reservation)
            .ok_or(Error::UnknownReservation(reservation))?;
        info!("[RISK] {} released for {}", reservation, held.symbol);
        inner.recount();
        Ok(())
    }

    /// Attach risk to a position that did not come through the gate
    /// (restored from storage or adopted from the exchange)
    pub async fn register_open(&self, position_id: PositionId, symbol: &str, risk_pct: Decimal) {
        let mut inner = self.inner.lock().await;
        inner.committed.insert(
            position_id,
            Committed {
                symbol: symbol.to_string(),
                risk_pct,
            },
        );
        inner.recount();
    }

    /// Account for a fully closed position
    ///
    /// Releases its risk, updates streaks, daily PnL and equity, and trips
    /// the breaker on a long enough losing streak.
    pub async fn record_close(
        &self,
        position_id: PositionId,
        realized_pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<BreakerTrip>> {
        let mut inner = self.inner.lock().await;
        let committed = inner
            .committed
            .remove(&position_id)
            .ok_or(Error::UnknownPosition(position_id))?;
        inner.recount();

        let state = &mut inner.state;
        if realized_pnl > Decimal::ZERO {
            state.consecutive_wins += 1;
            state.consecutive_losses = 0;
        } else {
            state.consecutive_losses += 1;
            state.consecutive_wins = 0;
        }

        if state.account_equity > Decimal::ZERO {
            state.daily_realized_pnl_pct += realized_pnl / state.account_equity;
        }
        let equity = state.account_equity + realized_pnl;
        state.update_equity(equity);

        info!(
            "[RISK] close {} {} pnl={} daily={} wins={} losses={}",
            committed.symbol,
            position_id,
            realized_pnl,
            state.daily_realized_pnl_pct,
            state.consecutive_wins,
            state.consecutive_losses
        );

        let limit = self.config.max_consecutive_losses;
        if limit > 0 && state.consecutive_losses >= limit && !state.breaker_blocks(now) {
            let until = now + self.config.circuit_breaker_cooldown();
            let reason = format!("{} consecutive losses", state.consecutive_losses);
            state.trip_breaker(until, reason.clone());
            drop(inner);
            warn!("[RISK] Circuit breaker tripped: {} (until {})", reason, until);
            self.notify_trip(&reason, until);
            return Ok(Some(BreakerTrip { reason, until }));
        }
        Ok(None)
    }

    /// Refresh equity from the exchange balance
    pub async fn update_equity(&self, equity: Decimal) {
        self.inner.lock().await.state.update_equity(equity);
    }

    /// Reset daily counters if the UTC date changed
    pub async fn roll_day(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().await;
        let rolled = inner.state.roll_day(now);
        if rolled {
            info!(
                "[RISK] Daily reset for {} (equity {})",
                inner.state.trading_day, inner.state.account_equity
            );
        }
        rolled
    }

    pub(crate) fn notify_trip(&self, reason: &str, until: DateTime<Utc>) {
        if let Some(notifier) = &self.notifier {
            notifier.emit(&EngineEvent::CircuitBreakerTripped {
                reason: reason.to_string(),
                until,
            });
        }
    }
}
