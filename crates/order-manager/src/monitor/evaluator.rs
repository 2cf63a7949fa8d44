//! Exit evaluation
//!
//! Pure function of `(Position, MarketView, MonitorConfig)`. At most one exit
//! path is chosen per tick, in priority order:
//!
//! 1. Emergency stop
//! 2. Stop loss (until breakeven is active)
//! 3. Trailing stop
//! 4. Funding exit
//! 5. Take profit (every reached level in one order)
//! 6. Breakeven stop
//!
//! Breakeven activation is a state change, not an exit, and can share a tick
//! with a partial take-profit.

use meridian_core::{ExitReason, Position, PositionSide, Timestamp};
use meridian_ports::FundingInfo;
use rust_decimal::Decimal;

use crate::config::MonitorConfig;

/// Market inputs for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct MarketView {
    pub price: Decimal,
    /// Recent prices for this position, oldest first, ending with `price`
    pub recent_prices: Vec<Decimal>,
    pub funding: Option<FundingInfo>,
    pub now: Timestamp,
}

impl MarketView {
    pub fn at(price: Decimal, now: Timestamp) -> Self {
        Self {
            price,
            recent_prices: vec![price],
            funding: None,
            now,
        }
    }

    pub fn with_history(mut self, recent_prices: Vec<Decimal>) -> Self {
        self.recent_prices = recent_prices;
        self
    }

    pub fn with_funding(mut self, funding: FundingInfo) -> Self {
        self.funding = Some(funding);
        self
    }
}

/// The single exit chosen for a tick
#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    Close(ExitReason),
    /// Reduce by `quantity`, consuming the first `levels` take-profit levels
    PartialTakeProfit { levels: usize, quantity: Decimal },
}

/// New trailing state
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingUpdate {
    pub peak: Decimal,
    pub callback_pct: Decimal,
    pub stop: Decimal,
}

impl TrailingUpdate {
    pub fn apply(&self, position: &mut Position) {
        position.trailing_active = true;
        position.trailing_peak_price = Some(self.peak);
        position.trailing_callback_pct = Some(self.callback_pct);
        position.trailing_stop_price = Some(self.stop);
    }

    fn differs_from(&self, position: &Position) -> bool {
        !position.trailing_active
            || position.trailing_peak_price != Some(self.peak)
            || position.trailing_callback_pct != Some(self.callback_pct)
            || position.trailing_stop_price != Some(self.stop)
    }
}

/// Everything a tick should do to one position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickPlan {
    pub trailing: Option<TrailingUpdate>,
    /// Fee-adjusted breakeven to activate
    pub breakeven: Option<Decimal>,
    pub exit: Option<ExitAction>,
}

impl TickPlan {
    fn close(reason: ExitReason) -> Self {
        Self {
            exit: Some(ExitAction::Close(reason)),
            ..Default::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.trailing.is_none() && self.breakeven.is_none() && self.exit.is_none()
    }
}

/// Decides exits and state changes for open positions
#[derive(Debug, Clone)]
pub struct ExitEvaluator {
    config: MonitorConfig,
    /// Fee rate assumed for the eventual exit (taker)
    exit_fee_rate: Decimal,
}

impl ExitEvaluator {
    pub fn new(config: MonitorConfig, exit_fee_rate: Decimal) -> Self {
        Self {
            config,
            exit_fee_rate,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn evaluate(&self, position: &Position, market: &MarketView) -> TickPlan {
        let price = market.price;
        let side = position.side;
        let pnl_pct = position.pnl_pct(price);

        if pnl_pct <= -self.config.emergency_stop_pct {
            return TickPlan::close(ExitReason::EmergencyStop);
        }

        if !position.breakeven_activated && side.crossed_against(price, position.stop_loss_price) {
            return TickPlan::close(ExitReason::StopLoss);
        }

        let mut plan = TickPlan::default();

        if let Some(update) = self.trailing(position, market, pnl_pct) {
            let crossed = side.crossed_against(price, update.stop);
            if update.differs_from(position) {
                plan.trailing = Some(update);
            }
            if crossed {
                plan.exit = Some(ExitAction::Close(ExitReason::TrailingStop));
                return plan;
            }
        }

        if self.funding_exit(side, market, pnl_pct) {
            plan.exit = Some(ExitAction::Close(ExitReason::FundingExit));
            return plan;
        }

        if !position.breakeven_activated && pnl_pct >= self.config.breakeven_activation_pct {
            plan.breakeven = Some(position.fee_adjusted_breakeven(self.exit_fee_rate));
        }

        let reached = position
            .take_profit_levels
            .iter()
            .take_while(|level| side.reached(price, level.price))
            .count();
        if reached > 0 {
            let fraction: Decimal = position.take_profit_levels[..reached]
                .iter()
                .map(|level| level.quantity_fraction)
                .sum();
            let quantity = (fraction * position.initial_quantity).min(position.quantity);
            plan.exit = if reached == position.take_profit_levels.len() || quantity >= position.quantity
            {
                Some(ExitAction::Close(ExitReason::TakeProfit))
            } else {
                Some(ExitAction::PartialTakeProfit {
                    levels: reached,
                    quantity,
                })
            };
            return plan;
        }

        if position.breakeven_activated && side.crossed_against(price, position.stop_loss_price) {
            plan.exit = Some(ExitAction::Close(ExitReason::BreakevenStop));
        }
        plan
    }

    /// Trailing state after this tick, or None while trailing is inactive
    fn trailing(&self, position: &Position, market: &MarketView, pnl_pct: Decimal) -> Option<TrailingUpdate> {
        if !position.trailing_active && pnl_pct < self.config.trailing_activation_pct {
            return None;
        }
        let side = position.side;
        let peak = match position.trailing_peak_price {
            Some(prev) => side.better(prev, market.price),
            None => market.price,
        };

        let target = self.target_callback(position, peak);
        let callback_pct = match position.trailing_callback_pct {
            None => target,
            Some(prev) if self.reversal(side, &market.recent_prices) => {
                (prev * self.config.reversal_widen_factor).min(self.config.max_callback_pct)
            }
            Some(prev) => prev.min(target),
        };

        let stop = match side {
            PositionSide::Long => peak * (Decimal::ONE - callback_pct),
            PositionSide::Short => peak * (Decimal::ONE + callback_pct),
        };
        Some(TrailingUpdate {
            peak,
            callback_pct,
            stop,
        })
    }

    /// ATR-scaled callback, clamped, then tightened by profit tier
    pub fn target_callback(&self, position: &Position, peak: Decimal) -> Decimal {
        let config = &self.config;
        let base = if position.entry_price > Decimal::ZERO {
            position.atr / position.entry_price * config.atr_callback_multiplier
        } else {
            Decimal::ZERO
        };
        let base = base.clamp(config.min_callback_pct, config.max_callback_pct);

        if config.trailing_activation_pct <= Decimal::ZERO {
            return base;
        }
        let multiple = position.pnl_pct(peak) / config.trailing_activation_pct;
        let factor = config
            .tightening_tiers
            .iter()
            .filter(|tier| multiple >= tier.profit_multiple)
            .map(|tier| tier.factor)
            .last()
            .unwrap_or(Decimal::ONE);
        base * factor
    }

    /// Move against `side` across the lookback window beyond the momentum threshold
    fn reversal(&self, side: PositionSide, prices: &[Decimal]) -> bool {
        let lookback = self.config.reversal_lookback_ticks;
        if lookback < 2 || prices.len() < lookback {
            return false;
        }
        let window = &prices[prices.len() - lookback..];
        let (first, last) = (window[0], window[lookback - 1]);
        if first <= Decimal::ZERO {
            return false;
        }
        -side.pnl_per_unit(first, last) / first >= self.config.reversal_momentum_pct
    }

    fn funding_exit(&self, side: PositionSide, market: &MarketView, pnl_pct: Decimal) -> bool {
        let Some(funding) = &market.funding else {
            return false;
        };
        let until = funding.next_settlement - market.now;
        if until < chrono::Duration::zero() || until > self.config.funding_exit_window() {
            return false;
        }
        // Longs pay positive rates, shorts pay negative ones
        let adverse = funding.rate * side.sign() > Decimal::ZERO;
        adverse
            && funding.rate.abs() >= self.config.funding_rate_threshold
            && pnl_pct >= self.config.funding_min_profit_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use meridian_core::TakeProfitLevel;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn quiet_config() -> MonitorConfig {
        // Trailing and breakeven far away unless a test opts in
        MonitorConfig {
            trailing_activation_pct: dec!(0.5),
            breakeven_activation_pct: dec!(0.5),
            ..Default::default()
        }
    }

    fn long() -> Position {
        Position::new(
            "BTCUSDT",
            PositionSide::Long,
            dec!(100),
            dec!(10),
            dec!(5),
            dec!(97),
            vec![
                TakeProfitLevel::new(dec!(103), dec!(0.3)),
                TakeProfitLevel::new(dec!(105), dec!(0.3)),
                TakeProfitLevel::new(dec!(108), dec!(0.4)),
            ],
        )
    }

    fn exit_of(plan: &TickPlan) -> Option<ExitAction> {
        plan.exit.clone()
    }

    #[test]
    fn test_emergency_beats_stop_loss() {
        let evaluator = ExitEvaluator::new(quiet_config(), dec!(0.0005));
        let plan = evaluator.evaluate(&long(), &MarketView::at(dec!(94), now()));
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::EmergencyStop)));
        assert!(plan.trailing.is_none());

        let plan = evaluator.evaluate(&long(), &MarketView::at(dec!(96.5), now()));
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::StopLoss)));
    }

    #[test]
    fn test_hold_between_stop_and_targets() {
        let evaluator = ExitEvaluator::new(quiet_config(), dec!(0.0005));
        let plan = evaluator.evaluate(&long(), &MarketView::at(dec!(101), now()));
        assert!(plan.is_noop());
    }

    #[test]
    fn test_reached_levels_are_combined() {
        let evaluator = ExitEvaluator::new(quiet_config(), dec!(0.0005));
        let plan = evaluator.evaluate(&long(), &MarketView::at(dec!(106), now()));
        assert_eq!(
            exit_of(&plan),
            Some(ExitAction::PartialTakeProfit {
                levels: 2,
                quantity: dec!(6.0),
            })
        );

        let plan = evaluator.evaluate(&long(), &MarketView::at(dec!(109), now()));
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::TakeProfit)));
    }

    #[test]
    fn test_breakeven_activates_alongside_partial() {
        let config = MonitorConfig {
            breakeven_activation_pct: dec!(0.02),
            ..quiet_config()
        };
        let evaluator = ExitEvaluator::new(config, dec!(0.0005));
        let plan = evaluator.evaluate(&long(), &MarketView::at(dec!(103.5), now()));
        assert!(plan.breakeven.is_some());
        assert!(matches!(
            plan.exit,
            Some(ExitAction::PartialTakeProfit { levels: 1, .. })
        ));
    }

    #[test]
    fn test_breakeven_stop_after_activation() {
        let evaluator = ExitEvaluator::new(quiet_config(), dec!(0.0005));
        let mut pos = long();
        pos.activate_breakeven(dec!(100.1));

        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(100.05), now()));
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::BreakevenStop)));

        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(100.5), now()));
        assert!(plan.exit.is_none());
    }

    #[test]
    fn test_trailing_activation_and_trigger() {
        let config = MonitorConfig {
            trailing_activation_pct: dec!(0.015),
            min_callback_pct: dec!(0.01),
            max_callback_pct: dec!(0.02),
            tightening_tiers: Vec::new(),
            ..quiet_config()
        };
        let evaluator = ExitEvaluator::new(config, dec!(0.0005));
        let mut pos = long();

        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(102), now()));
        let update = plan.trailing.clone().unwrap();
        assert_eq!(update.peak, dec!(102));
        assert_eq!(update.callback_pct, dec!(0.01));
        assert_eq!(update.stop, dec!(100.98));
        assert!(plan.exit.is_none());
        update.apply(&mut pos);

        // Below the peak but above the trailing stop: nothing changes
        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(101.5), now()));
        assert!(plan.is_noop());

        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(100.9), now()));
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::TrailingStop)));
    }

    #[test]
    fn test_callback_tightens_but_never_widens_without_reversal() {
        let config = MonitorConfig {
            trailing_activation_pct: dec!(0.01),
            min_callback_pct: dec!(0.01),
            max_callback_pct: dec!(0.02),
            tightening_tiers: vec![crate::config::TighteningTier::new(dec!(2), dec!(0.5))],
            reversal_lookback_ticks: 3,
            reversal_momentum_pct: dec!(0.004),
            reversal_widen_factor: dec!(1.5),
            ..quiet_config()
        };
        let evaluator = ExitEvaluator::new(config, dec!(0.0005));
        let mut pos = long();
        pos.take_profit_levels.clear();

        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(101.5), now()));
        plan.trailing.clone().unwrap().apply(&mut pos);
        assert_eq!(pos.trailing_callback_pct, Some(dec!(0.01)));

        // Profit multiple 2.5 reaches the tier
        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(102.5), now()));
        plan.trailing.clone().unwrap().apply(&mut pos);
        assert_eq!(pos.trailing_callback_pct, Some(dec!(0.005)));

        // A small pullback leaves the trailing state alone
        let history = vec![dec!(102.4), dec!(102.45), dec!(102.3)];
        let plan = evaluator.evaluate(
            &pos,
            &MarketView::at(dec!(102.3), now()).with_history(history),
        );
        assert!(plan.trailing.is_none());

        // A sharp move against the position widens it
        let history = vec![dec!(102.5), dec!(102.2), dec!(102.0)];
        let plan = evaluator.evaluate(
            &pos,
            &MarketView::at(dec!(102.0), now()).with_history(history),
        );
        let update = plan.trailing.unwrap();
        assert_eq!(update.callback_pct, dec!(0.0075));
    }

    #[test]
    fn test_funding_exit_window() {
        let config = MonitorConfig {
            funding_exit_window_ms: 10 * 60 * 1000,
            funding_rate_threshold: dec!(0.0005),
            funding_min_profit_pct: dec!(0.002),
            ..quiet_config()
        };
        let evaluator = ExitEvaluator::new(config, dec!(0.0005));
        let pos = long();
        let soon = FundingInfo {
            rate: dec!(0.001),
            next_settlement: now() + chrono::Duration::minutes(5),
        };

        let plan = evaluator.evaluate(
            &pos,
            &MarketView::at(dec!(101), now()).with_funding(soon),
        );
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::FundingExit)));

        // Favorable rate for a long
        let favorable = FundingInfo {
            rate: dec!(-0.001),
            ..soon
        };
        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(101), now()).with_funding(favorable));
        assert!(plan.exit.is_none());

        // Not enough profit to bank
        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(100.1), now()).with_funding(soon));
        assert!(plan.exit.is_none());

        // Settlement too far away
        let later = FundingInfo {
            next_settlement: now() + chrono::Duration::hours(2),
            ..soon
        };
        let plan = evaluator.evaluate(&pos, &MarketView::at(dec!(101), now()).with_funding(later));
        assert!(plan.exit.is_none());
    }

    #[test]
    fn test_short_side_mirrors() {
        let evaluator = ExitEvaluator::new(quiet_config(), dec!(0.0005));
        let short = Position::new(
            "ETHUSDT",
            PositionSide::Short,
            dec!(100),
            dec!(4),
            dec!(3),
            dec!(102),
            vec![
                TakeProfitLevel::new(dec!(97), dec!(0.5)),
                TakeProfitLevel::new(dec!(94), dec!(0.5)),
            ],
        );
        let plan = evaluator.evaluate(&short, &MarketView::at(dec!(102.5), now()));
        assert_eq!(exit_of(&plan), Some(ExitAction::Close(ExitReason::StopLoss)));

        let plan = evaluator.evaluate(&short, &MarketView::at(dec!(96), now()));
        assert_eq!(
            exit_of(&plan),
            Some(ExitAction::PartialTakeProfit {
                levels: 1,
                quantity: dec!(2.0),
            })
        );
    }
}
