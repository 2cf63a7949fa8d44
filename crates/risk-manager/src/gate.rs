//! Risk Gate
//!
//! Decides whether a candidate may open a position and at what size.
//! [`RiskGate::evaluate`] is pure; [`RiskGate::evaluate_and_reserve`] runs it
//! under the book's lock and reserves the risk on approval.
//!
//! Checks, in order, first failure wins:
//!
//! ```text
//! validate ─► breaker ─► daily hard stop ─► position count / duplicate
//!          ─► streak-adjusted risk vs portfolio cap ─► correlation ─► sizing
//! ```

use chrono::{DateTime, Utc};
use log::{info, warn};
use meridian_core::{
    PortfolioRiskState, RejectionReason, RiskDecision, SymbolRules, TradeCandidate,
};
use meridian_ports::CorrelationFilter;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::book::PortfolioRiskBook;
use crate::config::RiskConfig;

/// What the evaluation wants done to the circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerAction {
    Keep,
    /// Cooldown expired; clear before continuing
    Clear,
    Trip {
        until: DateTime<Utc>,
        reason: String,
    },
}

/// Result of a pure evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: RiskDecision,
    pub breaker: BreakerAction,
}

impl Evaluation {
    fn reject(candidate: &TradeCandidate, reason: RejectionReason, breaker: BreakerAction) -> Self {
        Self {
            decision: RiskDecision::reject(candidate.symbol.clone(), reason),
            breaker,
        }
    }
}

/// The risk gate
pub struct RiskGate {
    config: RiskConfig,
    correlation: Arc<dyn CorrelationFilter>,
}

impl RiskGate {
    pub fn new(config: RiskConfig, correlation: Arc<dyn CorrelationFilter>) -> Self {
        Self {
            config,
            correlation,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn correlation(&self) -> &Arc<dyn CorrelationFilter> {
        &self.correlation
    }

    /// Evaluate one candidate against a portfolio snapshot
    ///
    /// `exposed` lists symbols with an open position or a reservation
    /// (including candidates accepted earlier in the same cycle).
    pub fn evaluate(
        &self,
        candidate: &TradeCandidate,
        state: &PortfolioRiskState,
        exposed: &[String],
        rules: &SymbolRules,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let config = &self.config;

        // 0. Structure
        if let Err(e) = candidate.validate() {
            warn!("[RISK] {} invalid candidate: {}", candidate.symbol, e);
            return Evaluation::reject(
                candidate,
                RejectionReason::InvalidCandidate,
                BreakerAction::Keep,
            );
        }

        // 1. Circuit breaker
        let mut breaker = BreakerAction::Keep;
        if state.circuit_breaker_active {
            if state.breaker_blocks(now) {
                return Evaluation::reject(
                    candidate,
                    RejectionReason::CircuitBreakerActive,
                    BreakerAction::Keep,
                );
            }
            breaker = BreakerAction::Clear;
        }

        // 2. Daily hard stop
        let daily_loss_hit = state.daily_realized_pnl_pct <= -config.daily_max_loss_pct;
        let drawdown = state.intraday_drawdown_pct();
        let drawdown_hit = drawdown > config.intraday_drawdown_hard_stop_pct;
        if daily_loss_hit || drawdown_hit {
            let reason = if daily_loss_hit {
                format!("daily loss {} reached limit", state.daily_realized_pnl_pct)
            } else {
                format!("intraday drawdown {} over hard stop", drawdown)
            };
            return Evaluation::reject(
                candidate,
                RejectionReason::DailyLossLimit,
                BreakerAction::Trip {
                    until: now + config.circuit_breaker_cooldown(),
                    reason,
                },
            );
        }

        // 3. Position count
        if state.open_positions_count >= config.max_positions {
            return Evaluation::reject(candidate, RejectionReason::MaxPositionsReached, breaker);
        }
        if exposed.iter().any(|s| s == &candidate.symbol) {
            return Evaluation::reject(candidate, RejectionReason::DuplicateSymbol, breaker);
        }

        // 4. Per-trade risk against the portfolio cap
        let risk_pct =
            config.streak_adjusted_risk(state.consecutive_wins, state.consecutive_losses);
        if state.total_risk_pct_committed + risk_pct > config.max_portfolio_risk_pct {
            return Evaluation::reject(candidate, RejectionReason::RiskPerTradeExceeded, breaker);
        }

        // 5. Correlation with everything already held or accepted
        let corr = self
            .correlation
            .max_abs_correlation(&candidate.symbol, exposed);
        if corr > config.correlation_threshold {
            info!(
                "[RISK] {} correlation {:.2} > {:.2}",
                candidate.symbol, corr, config.correlation_threshold
            );
            return Evaluation::reject(candidate, RejectionReason::CorrelationLimit, breaker);
        }

        // 6. Sizing
        let leverage = candidate
            .suggested_leverage
            .max(Decimal::ONE)
            .min(config.max_leverage);
        let equity = state.account_equity;
        let distance = candidate.stop_distance();
        let by_risk = risk_pct * equity / distance * leverage;
        let by_margin = equity * config.max_margin_per_position_pct * leverage
            / candidate.entry_price;
        let quantity = rules.round_qty_down(by_risk.min(by_margin));

        if !rules.meets_minimums(quantity, candidate.entry_price) {
            return Evaluation::reject(candidate, RejectionReason::BelowMinimumSize, breaker);
        }

        Evaluation {
            decision: RiskDecision::approve(candidate.symbol.clone(), quantity, leverage, risk_pct),
            breaker,
        }
    }

    /// Evaluate under the book lock and reserve on approval
    pub async fn evaluate_and_reserve(
        &self,
        book: &PortfolioRiskBook,
        candidate: &TradeCandidate,
        rules: &SymbolRules,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let mut inner = book.lock().await;
        let exposed = inner.exposed_symbols();
        let Evaluation { decision, breaker } =
            self.evaluate(candidate, &inner.state, &exposed, rules, now);

        let mut tripped = None;
        match breaker {
            BreakerAction::Keep => {}
            BreakerAction::Clear => {
                info!("[RISK] Circuit breaker cooldown expired, clearing");
                inner.state.clear_breaker();
            }
            BreakerAction::Trip { until, reason } => {
                warn!("[RISK] Circuit breaker tripped: {} (until {})", reason, until);
                inner.state.trip_breaker(until, reason.clone());
                tripped = Some((reason, until));
            }
        }

        let decision = if decision.approved {
            let reservation = inner.reserve(&candidate.symbol, decision.risk_pct_used);
            info!(
                "[RISK] APPROVED {} {} qty={} lev={} risk={} ({})",
                candidate.symbol,
                candidate.side.as_str(),
                decision.adjusted_quantity,
                decision.adjusted_leverage,
                decision.risk_pct_used,
                reservation
            );
            decision.with_reservation(reservation)
        } else {
            info!(
                "[RISK] REJECTED {} score={}: {}",
                candidate.symbol,
                candidate.score,
                decision
                    .rejection_reason
                    .map(|r| r.as_str())
                    .unwrap_or("UNKNOWN")
            );
            decision
        };
        drop(inner);

        if let Some((reason, until)) = tripped {
            book.notify_trip(&reason, until);
        }
        decision
    }

    /// Order candidates by score descending, symbol ascending on ties
    pub fn rank(mut candidates: Vec<TradeCandidate>) -> Vec<TradeCandidate> {
        candidates.sort_by(|a, b| match b.score.cmp(&a.score) {
            Ordering::Equal => a.symbol.cmp(&b.symbol),
            other => other,
        });
        candidates
    }

    /// Greedy selection for one cycle
    ///
    /// Candidates are evaluated best score first; each approval reserves
    /// risk, so later candidates see it in the position count, the risk cap
    /// and the correlation set. Candidates with no known symbol rules are
    /// rejected as invalid.
    pub async fn select_batch(
        &self,
        book: &PortfolioRiskBook,
        candidates: Vec<TradeCandidate>,
        rules: &HashMap<String, SymbolRules>,
        now: DateTime<Utc>,
    ) -> Vec<(TradeCandidate, RiskDecision)> {
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in Self::rank(candidates) {
            let decision = match rules.get(&candidate.symbol) {
                Some(symbol_rules) => {
                    self.evaluate_and_reserve(book, &candidate, symbol_rules, now)
                        .await
                }
                None => {
                    warn!("[RISK] {} has no symbol rules", candidate.symbol);
                    RiskDecision::reject(candidate.symbol.clone(), RejectionReason::InvalidCandidate)
                }
            };
            out.push((candidate, decision));
        }
        out
    }
}
