use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::side::PositionSide;

/// Tolerance when checking that take-profit fractions sum to one
const FRACTION_EPSILON: Decimal = dec!(0.000001);

/// Market regime reported by the scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeTag {
    Trend,
    Range,
}

/// One take-profit level: close `quantity_fraction` of the initial size at `price`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub price: Decimal,
    /// Fraction of the initial quantity (0.0 - 1.0)
    pub quantity_fraction: Decimal,
}

impl TakeProfitLevel {
    pub fn new(price: Decimal, quantity_fraction: Decimal) -> Self {
        Self {
            price,
            quantity_fraction,
        }
    }
}

/// Why a candidate is structurally invalid
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CandidateError {
    #[error("Entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),

    #[error("Stop {stop} is not on the loss side of entry {entry} for {side}")]
    StopOnWrongSide {
        side: &'static str,
        entry: Decimal,
        stop: Decimal,
    },

    #[error("Take-profit {price} is not on the profit side of entry {entry}")]
    TakeProfitOnWrongSide { entry: Decimal, price: Decimal },

    #[error("Take-profit fractions sum to {0}, expected 1")]
    FractionSum(Decimal),

    #[error("Take-profit fraction {0} outside (0, 1]")]
    FractionRange(Decimal),

    #[error("No take-profit levels")]
    NoTakeProfit,

    #[error("Score {0} outside 0..=100")]
    ScoreRange(Decimal),

    #[error("Leverage must be at least 1, got {0}")]
    Leverage(Decimal),

    #[error("ATR must not be negative, got {0}")]
    NegativeAtr(Decimal),
}

/// A scored trade idea produced by the external scanner/scorer
///
/// Immutable once created; the risk gate and executor only read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub symbol: String,
    pub side: PositionSide,
    /// Score in 0..=100, higher is better
    pub score: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    /// Ordered take-profit levels; fractions sum to 1
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub suggested_leverage: Decimal,
    /// Volatility estimate in price units
    pub atr: Decimal,
    pub regime_tag: RegimeTag,
    pub timestamp: DateTime<Utc>,
    /// Recent close prices, oldest first (optional, used for correlation)
    #[serde(default)]
    pub recent_closes: Vec<Decimal>,
}

impl TradeCandidate {
    /// Create a candidate with a single take-profit level for the whole size
    pub fn new(
        symbol: impl Into<String>,
        side: PositionSide,
        score: Decimal,
        entry_price: Decimal,
        stop_loss_price: Decimal,
        take_profit: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            score,
            entry_price,
            stop_loss_price,
            take_profit_levels: vec![TakeProfitLevel::new(take_profit, Decimal::ONE)],
            suggested_leverage: Decimal::ONE,
            atr: Decimal::ZERO,
            regime_tag: RegimeTag::Trend,
            timestamp: Utc::now(),
            recent_closes: Vec::new(),
        }
    }

    pub fn with_take_profits(mut self, levels: Vec<TakeProfitLevel>) -> Self {
        self.take_profit_levels = levels;
        self
    }

    pub fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.suggested_leverage = leverage;
        self
    }

    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = atr;
        self
    }

    pub fn with_regime(mut self, regime: RegimeTag) -> Self {
        self.regime_tag = regime;
        self
    }

    pub fn with_closes(mut self, closes: Vec<Decimal>) -> Self {
        self.recent_closes = closes;
        self
    }

    /// Absolute distance between entry and stop
    pub fn stop_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss_price).abs()
    }

    /// Check the structural invariants of a candidate
    pub fn validate(&self) -> Result<(), CandidateError> {
        if self.entry_price <= Decimal::ZERO {
            return Err(CandidateError::NonPositiveEntry(self.entry_price));
        }
        if self.score < Decimal::ZERO || self.score > dec!(100) {
            return Err(CandidateError::ScoreRange(self.score));
        }
        if self.suggested_leverage < Decimal::ONE {
            return Err(CandidateError::Leverage(self.suggested_leverage));
        }
        if self.atr < Decimal::ZERO {
            return Err(CandidateError::NegativeAtr(self.atr));
        }
        if self.stop_loss_price <= Decimal::ZERO
            || !self
                .side
                .crossed_against(self.stop_loss_price, self.entry_price)
            || self.stop_loss_price == self.entry_price
        {
            return Err(CandidateError::StopOnWrongSide {
                side: self.side.as_str(),
                entry: self.entry_price,
                stop: self.stop_loss_price,
            });
        }
        if self.take_profit_levels.is_empty() {
            return Err(CandidateError::NoTakeProfit);
        }

        let mut sum = Decimal::ZERO;
        for level in &self.take_profit_levels {
            if level.quantity_fraction <= Decimal::ZERO || level.quantity_fraction > Decimal::ONE {
                return Err(CandidateError::FractionRange(level.quantity_fraction));
            }
            if level.price == self.entry_price || !self.side.reached(level.price, self.entry_price)
            {
                return Err(CandidateError::TakeProfitOnWrongSide {
                    entry: self.entry_price,
                    price: level.price,
                });
            }
            sum += level.quantity_fraction;
        }
        if (sum - Decimal::ONE).abs() > FRACTION_EPSILON {
            return Err(CandidateError::FractionSum(sum));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_candidate() -> TradeCandidate {
        TradeCandidate::new(
            "BTCUSDT",
            PositionSide::Long,
            dec!(80),
            dec!(100),
            dec!(98),
            dec!(104),
        )
    }

    #[test]
    fn test_valid_long() {
        assert!(long_candidate().validate().is_ok());
        assert_eq!(long_candidate().stop_distance(), dec!(2));
    }

    #[test]
    fn test_stop_on_wrong_side() {
        let mut c = long_candidate();
        c.stop_loss_price = dec!(101);
        assert!(matches!(
            c.validate(),
            Err(CandidateError::StopOnWrongSide { .. })
        ));
    }

    #[test]
    fn test_short_levels() {
        let c = TradeCandidate::new(
            "ETHUSDT",
            PositionSide::Short,
            dec!(70),
            dec!(100),
            dec!(103),
            dec!(95),
        );
        assert!(c.validate().is_ok());

        let bad = c.clone().with_take_profits(vec![TakeProfitLevel::new(dec!(105), dec!(1))]);
        assert!(matches!(
            bad.validate(),
            Err(CandidateError::TakeProfitOnWrongSide { .. })
        ));
    }

    #[test]
    fn test_fractions_must_sum_to_one() {
        let c = long_candidate().with_take_profits(vec![
            TakeProfitLevel::new(dec!(102), dec!(0.5)),
            TakeProfitLevel::new(dec!(104), dec!(0.3)),
        ]);
        assert_eq!(c.validate(), Err(CandidateError::FractionSum(dec!(0.8))));

        let ok = long_candidate().with_take_profits(vec![
            TakeProfitLevel::new(dec!(102), dec!(0.3333333)),
            TakeProfitLevel::new(dec!(103), dec!(0.3333333)),
            TakeProfitLevel::new(dec!(104), dec!(0.3333334)),
        ]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_score_and_leverage_bounds() {
        let mut c = long_candidate();
        c.score = dec!(101);
        assert!(matches!(c.validate(), Err(CandidateError::ScoreRange(_))));

        let c = long_candidate().with_leverage(dec!(0.5));
        assert!(matches!(c.validate(), Err(CandidateError::Leverage(_))));
    }
}
