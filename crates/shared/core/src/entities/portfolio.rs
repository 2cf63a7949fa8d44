use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregate risk counters for the whole account
///
/// There is exactly one of these per engine. It is owned by the portfolio
/// risk book and only mutated through it; everything else sees snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskState {
    pub open_positions_count: usize,

    /// Sum of risk fractions of open positions plus outstanding reservations
    pub total_risk_pct_committed: Decimal,

    pub consecutive_wins: u32,
    pub consecutive_losses: u32,

    /// Realized PnL of the current trading day as a fraction of equity
    pub daily_realized_pnl_pct: Decimal,

    /// Highest equity seen during the current trading day
    pub daily_peak_balance: Decimal,

    pub circuit_breaker_active: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub circuit_breaker_reason: Option<String>,

    /// Latest known account equity
    pub account_equity: Decimal,

    /// UTC date the daily counters belong to
    pub trading_day: NaiveDate,
}

impl PortfolioRiskState {
    pub fn new(account_equity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            open_positions_count: 0,
            total_risk_pct_committed: Decimal::ZERO,
            consecutive_wins: 0,
            consecutive_losses: 0,
            daily_realized_pnl_pct: Decimal::ZERO,
            daily_peak_balance: account_equity,
            circuit_breaker_active: false,
            cooldown_until: None,
            circuit_breaker_reason: None,
            account_equity,
            trading_day: now.date_naive(),
        }
    }

    /// Drawdown from the intraday peak as a fraction of the peak
    pub fn intraday_drawdown_pct(&self) -> Decimal {
        if self.daily_peak_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.daily_peak_balance - self.account_equity) / self.daily_peak_balance)
            .max(Decimal::ZERO)
    }

    /// Breaker is active and its cooldown has not yet expired
    pub fn breaker_blocks(&self, now: DateTime<Utc>) -> bool {
        self.circuit_breaker_active && self.cooldown_until.is_none_or(|until| now < until)
    }

    pub fn trip_breaker(&mut self, until: DateTime<Utc>, reason: impl Into<String>) {
        self.circuit_breaker_active = true;
        self.cooldown_until = Some(until);
        self.circuit_breaker_reason = Some(reason.into());
    }

    pub fn clear_breaker(&mut self) {
        self.circuit_breaker_active = false;
        self.cooldown_until = None;
        self.circuit_breaker_reason = None;
    }

    /// Record new equity, lifting the intraday peak if exceeded
    pub fn update_equity(&mut self, equity: Decimal) {
        self.account_equity = equity;
        if equity > self.daily_peak_balance {
            self.daily_peak_balance = equity;
        }
    }

    /// Start a new trading day if `now` falls after the recorded one
    ///
    /// Returns true when the counters were reset.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today <= self.trading_day {
            return false;
        }
        self.trading_day = today;
        self.daily_realized_pnl_pct = Decimal::ZERO;
        self.daily_peak_balance = self.account_equity;
        true
    }
}
