//! Post-fill liquidation headroom adjustment
//!
//! Right after an entry fills, the venue's liquidation price may sit closer
//! to the mark than `headroom_min_pct` of entry. The position is then cut by
//! `reduce_step_pct` (reduce-only, through the ledger) and re-measured, at
//! most `max_headroom_iterations` times. Cuts here resize the position; they
//! are not take-profits. Failures are logged and never undo the open.

use log::{info, warn};
use meridian_core::PositionId;
use meridian_ports::EngineEvent;
use rust_decimal::Decimal;

use crate::config::ExecutionConfig;
use crate::ledger::{PositionLedger, ReduceKind};

/// What the adjustment did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadroomReport {
    pub iterations: u32,
    /// Total quantity cut
    pub reduced: Decimal,
    /// Last headroom measured
    pub headroom_pct: Option<Decimal>,
}

pub async fn adjust_headroom(
    ledger: &PositionLedger,
    id: PositionId,
    config: &ExecutionConfig,
) -> HeadroomReport {
    let mut report = HeadroomReport::default();
    let Some(position) = ledger.get(id).await else {
        return report;
    };
    let gateway = ledger.gateway();
    let rules = match gateway.get_symbol_rules(&position.symbol).await {
        Ok(rules) => rules,
        Err(e) => {
            warn!("[EXEC] Headroom check for {} skipped: {}", position.symbol, e);
            return report;
        }
    };

    loop {
        let Some(position) = ledger.get(id).await else {
            break;
        };
        let risk = match gateway.get_position_risk(&position.symbol).await {
            Ok(risk) => risk,
            Err(e) => {
                warn!("[EXEC] Position risk for {} unavailable: {}", position.symbol, e);
                break;
            }
        };
        let Some(headroom) = risk.headroom_pct(position.entry_price) else {
            break;
        };
        report.headroom_pct = Some(headroom);
        if headroom >= config.headroom_min_pct || report.iterations >= config.max_headroom_iterations
        {
            break;
        }

        let cut = rules.round_qty_down(position.quantity * config.reduce_step_pct);
        if cut <= Decimal::ZERO || cut >= position.quantity {
            warn!(
                "[EXEC] {} headroom {} below {} but no valid cut from {}",
                position.symbol, headroom, config.headroom_min_pct, position.quantity
            );
            break;
        }

        match ledger.reduce(id, cut, ReduceKind::Headroom).await {
            Ok(outcome) => {
                report.iterations += 1;
                report.reduced += outcome.fill.quantity;
                ledger.notifier().emit(&EngineEvent::HeadroomReduced {
                    position_id: id,
                    symbol: position.symbol.clone(),
                    quantity: outcome.fill.quantity,
                    headroom_pct: headroom,
                });
                info!(
                    "[EXEC] {} headroom {} < {}: cut {} (now {})",
                    position.symbol,
                    headroom,
                    config.headroom_min_pct,
                    outcome.fill.quantity,
                    outcome.remaining
                );
                if outcome.closed {
                    break;
                }
            }
            Err(e) => {
                warn!("[EXEC] Headroom cut on {} failed: {}", position.symbol, e);
                break;
            }
        }
    }
    report
}
