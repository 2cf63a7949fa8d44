use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::candidate::{TakeProfitLevel, TradeCandidate};
use super::side::PositionSide;

/// Margin mode for a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    /// Cross margin - all positions share the same margin pool
    Cross,
    /// Isolated margin - each position has its own margin
    #[default]
    Isolated,
}

/// Position lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Entry order in flight
    Opening,
    /// Fully open, monitored every tick
    Open,
    /// Reduce-only order in flight (partial take-profit or headroom)
    Reducing,
    /// Full close in flight
    Closing,
    /// Terminal
    Closed,
}

impl PositionStatus {
    /// Statuses in which the position still holds quantity
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Closed)
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    EmergencyStop,
    StopLoss,
    TrailingStop,
    FundingExit,
    /// Final take-profit level consumed the remaining quantity
    TakeProfit,
    BreakevenStop,
    /// Operator-requested close
    Manual,
    /// Position disappeared on the exchange (closed outside the engine)
    ExternalClose,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmergencyStop => "EMERGENCY_STOP",
            Self::StopLoss => "STOP_LOSS",
            Self::TrailingStop => "TRAILING_STOP",
            Self::FundingExit => "FUNDING_EXIT",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::BreakevenStop => "BREAKEVEN_STOP",
            Self::Manual => "MANUAL",
            Self::ExternalClose => "EXTERNAL_CLOSE",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open (or closed) trading position
///
/// Owned by the position ledger. Every field here is persisted so a restart
/// resumes monitoring with the same stop and take-profit state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique position identifier
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,

    /// Average entry price (VWAP of entry fills)
    pub entry_price: Decimal,

    /// Current remaining quantity (always positive while active)
    pub quantity: Decimal,

    /// Quantity at open (after any headroom resize)
    pub initial_quantity: Decimal,

    pub leverage: Decimal,
    pub margin_mode: MarginMode,

    /// Protective stop; only ever moves in the favorable direction
    pub stop_loss_price: Decimal,

    /// Pending take-profit levels, nearest first
    pub take_profit_levels: Vec<TakeProfitLevel>,

    pub status: PositionStatus,

    pub breakeven_activated: bool,
    /// Fee-adjusted breakeven price, set on activation
    pub breakeven_price: Option<Decimal>,

    pub trailing_active: bool,
    /// Best price seen since trailing activation
    pub trailing_peak_price: Option<Decimal>,
    /// Current callback distance as a fraction of the peak
    pub trailing_callback_pct: Option<Decimal>,
    pub trailing_stop_price: Option<Decimal>,

    /// Sum of take-profit fractions already filled
    pub filled_tp_fraction: Decimal,

    /// Volatility estimate carried over from the candidate
    pub atr: Decimal,

    /// Fee rate paid on entry (maker or taker)
    pub entry_fee_rate: Decimal,
    /// Total fees paid so far (entry + exits)
    pub fees_paid: Decimal,
    /// Funding paid so far (negative = received)
    pub funding_paid: Decimal,

    /// Realized PnL net of fees and funding, accumulated across partial exits
    pub realized_pnl: Decimal,

    /// Fraction of equity committed to this position by the risk gate
    pub risk_pct: Decimal,

    /// Adopted from the exchange during reconciliation
    pub adopted: bool,

    pub exit_reason: Option<ExitReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a new open position
    ///
    /// Timestamps start at the Unix epoch; the owner stamps them from its
    /// clock with [`Position::with_opened_at`].
    pub fn new(
        symbol: impl Into<String>,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        leverage: Decimal,
        stop_loss_price: Decimal,
        take_profit_levels: Vec<TakeProfitLevel>,
    ) -> Self {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let mut levels = take_profit_levels;
        sort_nearest_first(side, &mut levels);

        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            initial_quantity: quantity,
            leverage,
            margin_mode: MarginMode::default(),
            stop_loss_price,
            take_profit_levels: levels,
            status: PositionStatus::Open,
            breakeven_activated: false,
            breakeven_price: None,
            trailing_active: false,
            trailing_peak_price: None,
            trailing_callback_pct: None,
            trailing_stop_price: None,
            filled_tp_fraction: Decimal::ZERO,
            atr: Decimal::ZERO,
            entry_fee_rate: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            funding_paid: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            risk_pct: Decimal::ZERO,
            adopted: false,
            exit_reason: None,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    /// Build a position from a filled candidate
    pub fn from_fill(
        candidate: &TradeCandidate,
        filled_price: Decimal,
        filled_quantity: Decimal,
        leverage: Decimal,
    ) -> Self {
        Self::new(
            candidate.symbol.clone(),
            candidate.side,
            filled_price,
            filled_quantity,
            leverage,
            candidate.stop_loss_price,
            candidate.take_profit_levels.clone(),
        )
        .with_atr(candidate.atr)
    }

    pub fn with_margin_mode(mut self, mode: MarginMode) -> Self {
        self.margin_mode = mode;
        self
    }

    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = atr;
        self
    }

    pub fn with_risk_pct(mut self, risk_pct: Decimal) -> Self {
        self.risk_pct = risk_pct;
        self
    }

    /// Record the entry fee; it is realized immediately as a cost
    pub fn with_entry_fee(mut self, fee_rate: Decimal) -> Self {
        let fee = self.entry_price * self.quantity * fee_rate;
        self.entry_fee_rate = fee_rate;
        self.fees_paid += fee;
        self.realized_pnl -= fee;
        self
    }

    /// Mark as adopted from the exchange
    pub fn adopted(mut self) -> Self {
        self.adopted = true;
        self
    }

    pub fn with_opened_at(mut self, at: DateTime<Utc>) -> Self {
        self.opened_at = at;
        self.updated_at = at;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Unrealized PnL of the remaining quantity at `price` (before exit fees)
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.side.pnl_per_unit(self.entry_price, price) * self.quantity
    }

    /// Price move in the position's favor as a fraction of entry
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.pnl_per_unit(self.entry_price, price) / self.entry_price
    }

    pub fn notional(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Remaining quantity as a fraction of the initial quantity
    pub fn remaining_fraction(&self) -> Decimal {
        if self.initial_quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.quantity / self.initial_quantity
    }

    /// `filled_tp_fraction + remaining_fraction == 1` within `tolerance`
    pub fn tp_accounting_holds(&self, tolerance: Decimal) -> bool {
        (self.filled_tp_fraction + self.remaining_fraction() - Decimal::ONE).abs() <= tolerance
    }

    /// True zero-profit exit price for the remaining quantity
    ///
    /// Accounts for the entry fee rate, an estimated exit fee rate and the
    /// funding paid so far.
    pub fn fee_adjusted_breakeven(&self, exit_fee_rate: Decimal) -> Decimal {
        let funding_per_unit = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.funding_paid / self.quantity
        };
        let entry = self.entry_price;
        match self.side {
            PositionSide::Long => {
                (entry * (Decimal::ONE + self.entry_fee_rate) + funding_per_unit)
                    / (Decimal::ONE - exit_fee_rate)
            }
            PositionSide::Short => {
                (entry * (Decimal::ONE - self.entry_fee_rate) - funding_per_unit)
                    / (Decimal::ONE + exit_fee_rate)
            }
        }
    }

    /// Move the stop to `new_stop` only if it is more favorable
    ///
    /// Returns true if the stop moved. This is the only way the stop changes,
    /// so a breakeven stop can never be loosened afterwards.
    pub fn ratchet_stop(&mut self, new_stop: Decimal) -> bool {
        if self.side.is_tighter_stop(new_stop, self.stop_loss_price) {
            self.stop_loss_price = new_stop;
            true
        } else {
            false
        }
    }

    /// Activate breakeven protection at `breakeven_price`
    pub fn activate_breakeven(&mut self, breakeven_price: Decimal) {
        self.breakeven_activated = true;
        self.breakeven_price = Some(breakeven_price);
        self.ratchet_stop(breakeven_price);
    }

    /// Apply an exit fill for `quantity` at `price`, paying `fee`
    ///
    /// Returns the PnL realized by this piece.
    pub fn apply_exit_fill(&mut self, quantity: Decimal, price: Decimal, fee: Decimal) -> Decimal {
        let qty = quantity.min(self.quantity);
        let pnl = self.side.pnl_per_unit(self.entry_price, price) * qty - fee;
        self.quantity -= qty;
        self.realized_pnl += pnl;
        self.fees_paid += fee;
        pnl
    }

    /// Remove the first `count` pending take-profit levels, recording their fractions
    pub fn consume_take_profits(&mut self, count: usize) -> Decimal {
        let count = count.min(self.take_profit_levels.len());
        let consumed: Decimal = self
            .take_profit_levels
            .drain(..count)
            .map(|l| l.quantity_fraction)
            .sum();
        self.filled_tp_fraction += consumed;
        consumed
    }

    /// Record a take-profit reduce over the first `levels` pending levels
    ///
    /// Only the fraction actually filled (`filled / initial_quantity`) is
    /// recorded. Levels are consumed nearest-first; a level the fill only
    /// partly covered stays pending with the unfilled part of its fraction.
    /// Returns the fraction recorded.
    pub fn record_take_profit_fill(&mut self, levels: usize, filled: Decimal) -> Decimal {
        if self.initial_quantity <= Decimal::ZERO || filled <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let levels = levels.min(self.take_profit_levels.len());
        let mut left = filled / self.initial_quantity;
        let mut recorded = Decimal::ZERO;
        let mut consumed = 0;
        for level in self.take_profit_levels.iter_mut().take(levels) {
            if left + FRACTION_EPSILON >= level.quantity_fraction {
                let taken = level.quantity_fraction.min(left);
                left -= taken;
                recorded += taken;
                consumed += 1;
            } else {
                level.quantity_fraction -= left;
                recorded += left;
                break;
            }
        }
        self.take_profit_levels.drain(..consumed);
        self.filled_tp_fraction += recorded;
        recorded
    }

    /// Record funding paid (negative = received)
    pub fn record_funding(&mut self, amount: Decimal) {
        self.funding_paid += amount;
        self.realized_pnl -= amount;
    }

    /// Rescale `initial_quantity` after a reduction that was not a take-profit
    ///
    /// Keeps `filled_tp_fraction + quantity / initial_quantity == 1`, so the
    /// pending levels (fractions of `initial_quantity`) cover exactly the
    /// remaining quantity.
    pub fn rebase_initial_quantity(&mut self) {
        let pending = Decimal::ONE - self.filled_tp_fraction;
        self.initial_quantity = if pending > Decimal::ZERO && self.quantity > Decimal::ZERO {
            self.quantity / pending
        } else {
            self.quantity
        };
    }

    /// Shrink to `quantity` after the exchange reported less than is tracked
    pub fn shrink_to(&mut self, quantity: Decimal) {
        self.quantity = quantity.min(self.quantity).max(Decimal::ZERO);
        self.rebase_initial_quantity();
    }

    /// Transition to closed
    pub fn mark_closed(&mut self, reason: ExitReason, at: DateTime<Utc>) {
        self.status = PositionStatus::Closed;
        self.exit_reason = Some(reason);
        self.closed_at = Some(at);
        self.updated_at = at;
    }
}

/// Slack when matching a filled fraction against a level's fraction
const FRACTION_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 12);

/// Sort take-profit levels so the one closest to entry comes first
fn sort_nearest_first(side: PositionSide, levels: &mut [TakeProfitLevel]) {
    match side {
        PositionSide::Long => levels.sort_by(|a, b| a.price.cmp(&b.price)),
        PositionSide::Short => levels.sort_by(|a, b| b.price.cmp(&a.price)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position::new(
            "BTCUSDT",
            PositionSide::Long,
            dec!(100),
            dec!(10),
            dec!(5),
            dec!(98),
            vec![
                TakeProfitLevel::new(dec!(106), dec!(0.5)),
                TakeProfitLevel::new(dec!(103), dec!(0.5)),
            ],
        )
    }

    #[test]
    fn test_levels_sorted_nearest_first() {
        let pos = long_position();
        assert_eq!(pos.take_profit_levels[0].price, dec!(103));

        let short = Position::new(
            "ETHUSDT",
            PositionSide::Short,
            dec!(100),
            dec!(1),
            dec!(1),
            dec!(102),
            vec![
                TakeProfitLevel::new(dec!(90), dec!(0.5)),
                TakeProfitLevel::new(dec!(95), dec!(0.5)),
            ],
        );
        assert_eq!(short.take_profit_levels[0].price, dec!(95));
    }

    #[test]
    fn test_pnl() {
        let pos = long_position();
        assert_eq!(pos.unrealized_pnl(dec!(102)), dec!(20));
        assert_eq!(pos.pnl_pct(dec!(102)), dec!(0.02));
        assert_eq!(pos.pnl_pct(dec!(97)), dec!(-0.03));
    }

    #[test]
    fn test_stop_only_ratchets_forward() {
        let mut pos = long_position();
        assert!(pos.ratchet_stop(dec!(99)));
        assert!(!pos.ratchet_stop(dec!(97)));
        assert_eq!(pos.stop_loss_price, dec!(99));
    }

    #[test]
    fn test_breakeven_never_loosens_tighter_stop() {
        let mut pos = long_position();
        pos.ratchet_stop(dec!(101));
        pos.activate_breakeven(dec!(100.2));
        assert!(pos.breakeven_activated);
        assert_eq!(pos.stop_loss_price, dec!(101));
    }

    #[test]
    fn test_fee_adjusted_breakeven() {
        let pos = long_position().with_entry_fee(dec!(0.0005));
        let be = pos.fee_adjusted_breakeven(dec!(0.0005));
        // Closing at breakeven nets zero across both fees
        let pnl = (be - dec!(100)) * dec!(10) - dec!(100) * dec!(10) * dec!(0.0005)
            - be * dec!(10) * dec!(0.0005);
        assert!(pnl.abs() < dec!(0.0000001));
        assert!(be > dec!(100.09) && be < dec!(100.11));
    }

    #[test]
    fn test_short_breakeven_below_entry() {
        let pos = Position::new(
            "ETHUSDT",
            PositionSide::Short,
            dec!(100),
            dec!(1),
            dec!(1),
            dec!(102),
            vec![TakeProfitLevel::new(dec!(95), dec!(1))],
        )
        .with_entry_fee(dec!(0.001));
        assert!(pos.fee_adjusted_breakeven(dec!(0.001)) < dec!(100));
    }

    #[test]
    fn test_partial_exit_accounting() {
        let mut pos = long_position();
        let consumed = pos.consume_take_profits(1);
        assert_eq!(consumed, dec!(0.5));
        let pnl = pos.apply_exit_fill(dec!(5), dec!(103), dec!(0.5));
        assert_eq!(pnl, dec!(14.5));
        assert_eq!(pos.quantity, dec!(5));
        assert!(pos.tp_accounting_holds(dec!(0.000001)));
        assert_eq!(pos.take_profit_levels.len(), 1);
    }

    #[test]
    fn test_short_take_profit_fill_keeps_level_remainder() {
        let mut pos = long_position();
        // Level 103 asks for 5 of 10; only 2 fill
        let pnl = pos.apply_exit_fill(dec!(2), dec!(103), Decimal::ZERO);
        assert_eq!(pnl, dec!(6));
        let recorded = pos.record_take_profit_fill(1, dec!(2));

        assert_eq!(recorded, dec!(0.2));
        assert_eq!(pos.filled_tp_fraction, dec!(0.2));
        assert_eq!(pos.take_profit_levels.len(), 2);
        assert_eq!(pos.take_profit_levels[0].quantity_fraction, dec!(0.3));
        assert!(pos.tp_accounting_holds(dec!(0.000001)));

        // The rest of the level fills next time
        pos.apply_exit_fill(dec!(3), dec!(103), Decimal::ZERO);
        pos.record_take_profit_fill(1, dec!(3));
        assert_eq!(pos.take_profit_levels.len(), 1);
        assert_eq!(pos.filled_tp_fraction, dec!(0.5));
        assert!(pos.tp_accounting_holds(dec!(0.000001)));
    }

    #[test]
    fn test_fill_spanning_levels() {
        let mut pos = long_position();
        pos.apply_exit_fill(dec!(7), dec!(106), Decimal::ZERO);
        assert_eq!(pos.record_take_profit_fill(2, dec!(7)), dec!(0.7));
        assert_eq!(pos.take_profit_levels.len(), 1);
        assert_eq!(pos.take_profit_levels[0].quantity_fraction, dec!(0.3));
        assert!(pos.tp_accounting_holds(dec!(0.000001)));
    }

    #[test]
    fn test_shrink_rebases_after_take_profit() {
        let mut pos = long_position();
        pos.apply_exit_fill(dec!(5), dec!(103), Decimal::ZERO);
        pos.record_take_profit_fill(1, dec!(5));

        // Exchange reports 2 left of the 5 tracked
        pos.shrink_to(dec!(2));
        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.initial_quantity, dec!(4));
        assert!(pos.tp_accounting_holds(dec!(0.000001)));
        // The pending level now sizes to what is left
        let level = &pos.take_profit_levels[0];
        assert_eq!(level.quantity_fraction * pos.initial_quantity, dec!(2));
    }

    #[test]
    fn test_new_leaves_timestamps_to_owner() {
        let pos = long_position();
        assert_eq!(pos.opened_at, DateTime::<Utc>::UNIX_EPOCH);
        let at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_000);
        let pos = pos.with_opened_at(at);
        assert_eq!(pos.opened_at, at);
        assert_eq!(pos.updated_at, at);
    }

    #[test]
    fn test_serde_round_trip_preserves_fields() {
        let mut pos = long_position().with_entry_fee(dec!(0.0002));
        pos.activate_breakeven(dec!(100.1));
        pos.trailing_active = true;
        pos.trailing_peak_price = Some(dec!(104));

        let json = serde_json::to_string(&pos).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }
}
