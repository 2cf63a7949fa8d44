//! Cycle Orchestrator
//!
//! One cycle is a strictly sequential pass:
//!
//! ```text
//! reconcile ─► roll day ─► get_candidates ─► observe / adjust / filter / rank
//!           ─► symbol rules ─► RiskGate::select_batch ─► execute approved, in order
//!           ─► metrics
//! ```
//!
//! [`Orchestrator::run`] starts a cycle every `cycle_interval` in its own
//! task. A cycle outliving `cycle_timeout` is logged as abandoned but keeps
//! running to completion, so every reservation it made is committed or
//! released by the cycle itself. Ticks arriving while it runs are skipped.

use log::{debug, info, warn};
use meridian_core::{PositionId, RejectionReason, SymbolRules, TradeCandidate};
use meridian_order_manager::{OrderExecutor, PositionLedger, ReconcileReport};
use meridian_ports::{CandidateSource, ScoreAdjuster};
use meridian_risk_manager::RiskGate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::OrchestratorConfig;
use crate::metrics::MetricsRegistry;

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Candidates returned by the source
    pub candidates: usize,
    /// Candidates left after the score filter and the per-cycle cap
    pub considered: usize,
    pub approved: usize,
    pub rejections: Vec<RejectionReason>,
    /// Positions opened this cycle
    pub executed: Vec<PositionId>,
    /// `(symbol, error)` for approved candidates that failed to execute
    pub failed: Vec<(String, String)>,
    pub reconciled: Option<ReconcileReport>,
    /// Set when the cycle was aborted before selection
    pub error: Option<String>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    ledger: Arc<PositionLedger>,
    gate: RiskGate,
    executor: OrderExecutor,
    source: Arc<dyn CandidateSource>,
    adjuster: Option<Arc<dyn ScoreAdjuster>>,
    metrics: Arc<MetricsRegistry>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        ledger: Arc<PositionLedger>,
        gate: RiskGate,
        executor: OrderExecutor,
        source: Arc<dyn CandidateSource>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            ledger,
            gate,
            executor,
            source,
            adjuster: None,
            metrics,
        }
    }

    pub fn with_score_adjuster(mut self, adjuster: Arc<dyn ScoreAdjuster>) -> Self {
        self.adjuster = Some(adjuster);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Run cycles until `shutdown` flips to true (or its sender is dropped)
    ///
    /// On shutdown the in-flight cycle, if any, is awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.cycle_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "[CYCLE] Started (every {:?}, timeout {:?})",
            self.config.cycle_interval(),
            self.config.cycle_timeout()
        );

        let mut current: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(handle) = &current
                        && !handle.is_finished()
                    {
                        warn!("[CYCLE] Previous cycle still running, skipping tick");
                        self.metrics.update(|m| m.cycles_skipped += 1);
                        continue;
                    }
                    current = Some(Arc::clone(&self).spawn_cycle());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = current
            && let Err(e) = handle.await
        {
            warn!("[CYCLE] Cycle task failed: {}", e);
        }
        info!("[CYCLE] Stopped");
    }

    /// Run one cycle in its own task, watching it against `cycle_timeout`
    fn spawn_cycle(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let timeout = self.config.cycle_timeout();
            let started = Instant::now();
            let cycle = self.run_cycle();
            tokio::pin!(cycle);

            tokio::select! {
                _ = &mut cycle => return,
                _ = tokio::time::sleep(timeout) => {
                    warn!(
                        "[CYCLE] Cycle exceeded {:?}, abandoning it; in-flight orders are left to finish",
                        timeout
                    );
                    self.metrics.update(|m| m.cycles_timed_out += 1);
                }
            }

            let report = cycle.await;
            info!(
                "[CYCLE] Abandoned cycle finished after {:?} ({} opened)",
                started.elapsed(),
                report.executed.len()
            );
        })
    }

    // ========================================================================
    // One cycle
    // ========================================================================

    /// One full scan-select-execute pass
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let book = self.ledger.book();

        if let Err(e) = self.sync_account(&mut report).await {
            warn!("[CYCLE] Account sync failed, skipping cycle: {}", e);
            report.error = Some(e);
            return self.finish(report);
        }

        let now = self.ledger.clock().now();
        book.roll_day(now).await;

        let candidates = match self.source.get_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("[CYCLE] Candidate source failed: {}", e);
                report.error = Some(e.to_string());
                return self.finish(report);
            }
        };
        report.candidates = candidates.len();

        let candidates = self.prepare(candidates);
        report.considered = candidates.len();
        if candidates.is_empty() {
            debug!("[CYCLE] No candidates");
            return self.finish(report);
        }

        let rules = self.symbol_rules(&candidates).await;
        let selected = self.gate.select_batch(book, candidates, &rules, now).await;

        for (candidate, decision) in selected {
            if !decision.approved {
                report.rejections.push(
                    decision
                        .rejection_reason
                        .unwrap_or(RejectionReason::InvalidCandidate),
                );
                continue;
            }
            report.approved += 1;

            let result = self.executor.execute(&candidate, &decision).await;
            match (result.success, result.position_id) {
                (true, Some(id)) => report.executed.push(id),
                _ => {
                    let error = result
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    report.failed.push((candidate.symbol.clone(), error));
                }
            }
        }

        self.finish(report)
    }

    /// Reconcile with the exchange (or just read the balance) and refresh equity
    async fn sync_account(&self, report: &mut CycleReport) -> Result<(), String> {
        let balance = if self.config.reconcile_each_cycle {
            let reconciled = self.ledger.reconcile().await.map_err(|e| e.to_string())?;
            let balance = reconciled.balance;
            report.reconciled = Some(reconciled);
            balance
        } else {
            self.ledger
                .gateway()
                .get_account_state()
                .await
                .map_err(|e| e.to_string())?
                .balance
        };
        self.ledger.book().update_equity(balance).await;
        Ok(())
    }

    /// Observe, adjust scores, drop low scores, rank and cap
    fn prepare(&self, candidates: Vec<TradeCandidate>) -> Vec<TradeCandidate> {
        let correlation = self.gate.correlation();
        let mut kept = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            correlation.observe(&candidate);
            if let Some(adjuster) = &self.adjuster {
                let adjusted = adjuster.adjust(&candidate).clamp(Decimal::ZERO, dec!(100));
                if adjusted != candidate.score {
                    debug!(
                        "[CYCLE] {} score {} -> {}",
                        candidate.symbol, candidate.score, adjusted
                    );
                    candidate.score = adjusted;
                }
            }
            if candidate.score < self.config.min_score {
                debug!(
                    "[CYCLE] {} below min score ({} < {})",
                    candidate.symbol, candidate.score, self.config.min_score
                );
                continue;
            }
            kept.push(candidate);
        }

        let mut ranked = RiskGate::rank(kept);
        ranked.truncate(self.config.max_candidates_per_cycle);
        ranked
    }

    /// Venue rules for each distinct symbol; failures leave the symbol out
    async fn symbol_rules(&self, candidates: &[TradeCandidate]) -> HashMap<String, SymbolRules> {
        let mut rules = HashMap::new();
        for candidate in candidates {
            if rules.contains_key(&candidate.symbol) {
                continue;
            }
            match self.ledger.gateway().get_symbol_rules(&candidate.symbol).await {
                Ok(r) => {
                    rules.insert(candidate.symbol.clone(), r);
                }
                Err(e) => warn!("[CYCLE] No rules for {}: {}", candidate.symbol, e),
            }
        }
        rules
    }

    fn finish(&self, report: CycleReport) -> CycleReport {
        self.metrics.update(|m| m.record_cycle(&report));
        if report.error.is_none() {
            info!(
                "[CYCLE] {} candidates, {} considered, {} approved, {} rejected, {} opened, {} failed",
                report.candidates,
                report.considered,
                report.approved,
                report.rejections.len(),
                report.executed.len(),
                report.failed.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use meridian_clock::RuntimeClock;
    use meridian_core::PositionSide;
    use meridian_gateway::{GatewayError, PaperExchange};
    use meridian_order_manager::ExecutionConfig;
    use meridian_ports::SourceError;
    use meridian_risk_manager::{PortfolioRiskBook, RiskConfig, StaticCorrelationMatrix};
    use std::time::Duration;

    use crate::sinks::{LogNotifier, MemoryStore};
    use crate::source::StaticCandidateSource;

    fn long(symbol: &str, score: Decimal) -> TradeCandidate {
        TradeCandidate::new(symbol, PositionSide::Long, score, dec!(100), dec!(98), dec!(104))
            .with_leverage(dec!(5))
    }

    struct Fixture {
        venue: Arc<PaperExchange>,
        ledger: Arc<PositionLedger>,
        metrics: Arc<MetricsRegistry>,
    }

    async fn fixture() -> Fixture {
        let _ = env_logger::try_init();
        let venue = Arc::new(PaperExchange::new(dec!(10000)));
        venue.list_symbol("BTCUSDT", dec!(100)).await;
        venue.list_symbol("ETHUSDT", dec!(100)).await;
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let book = Arc::new(PortfolioRiskBook::new(RiskConfig::default(), dec!(10000), t0));
        let ledger = Arc::new(PositionLedger::new(
            venue.clone(),
            Arc::new(MemoryStore::new()),
            book,
            Arc::new(LogNotifier),
            Arc::new(RuntimeClock::new(Some(t0))),
        ));
        Fixture {
            venue,
            ledger,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    fn orchestrator(
        fx: &Fixture,
        config: OrchestratorConfig,
        source: Arc<dyn CandidateSource>,
    ) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::clone(&fx.ledger),
            RiskGate::new(RiskConfig::default(), Arc::new(StaticCorrelationMatrix::new())),
            OrderExecutor::new(Arc::clone(&fx.ledger), ExecutionConfig::default()),
            source,
            Arc::clone(&fx.metrics),
        )
    }

    struct Halve;

    impl ScoreAdjuster for Halve {
        fn adjust(&self, candidate: &TradeCandidate) -> Decimal {
            candidate.score / dec!(2)
        }
    }

    struct Failing;

    #[async_trait]
    impl CandidateSource for Failing {
        async fn get_candidates(&self) -> Result<Vec<TradeCandidate>, SourceError> {
            Err(SourceError::Unavailable("scanner offline".into()))
        }
    }

    /// Source that takes `delay` to answer
    struct Slow(Duration);

    #[async_trait]
    impl CandidateSource for Slow {
        async fn get_candidates(&self) -> Result<Vec<TradeCandidate>, SourceError> {
            tokio::time::sleep(self.0).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_opens_approved_candidate() {
        let fx = fixture().await;
        let source = Arc::new(StaticCandidateSource::new(vec![long("BTCUSDT", dec!(80))]));
        let orchestrator = orchestrator(&fx, OrchestratorConfig::default(), source);

        let report = orchestrator.run_cycle().await;

        assert_eq!(report.candidates, 1);
        assert_eq!(report.approved, 1);
        assert_eq!(report.executed.len(), 1);
        assert!(report.reconciled.is_some());
        assert_eq!(fx.ledger.len(), 1);
        assert_eq!(fx.metrics.snapshot().executions_succeeded, 1);

        // Same symbol next cycle is a duplicate
        let report = orchestrator.run_cycle().await;
        assert_eq!(report.rejections, vec![RejectionReason::DuplicateSymbol]);
        assert_eq!(fx.ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjusted_scores_filtered_and_capped() {
        let fx = fixture().await;
        let source = Arc::new(StaticCandidateSource::new(vec![
            long("BTCUSDT", dec!(90)),
            long("ETHUSDT", dec!(70)),
            long("SOLUSDT", dec!(95)),
        ]));
        let config = OrchestratorConfig {
            min_score: dec!(40),
            max_candidates_per_cycle: 1,
            ..Default::default()
        };
        let orchestrator = orchestrator(&fx, config, source).with_score_adjuster(Arc::new(Halve));

        let candidates = orchestrator.prepare(vec![
            long("BTCUSDT", dec!(90)),
            long("ETHUSDT", dec!(70)),
            long("SOLUSDT", dec!(95)),
            long("XRPUSDT", dec!(250)),
        ]);
        // 45, 35 (dropped), 47.5, 125 clamped to 100; capped to the best one
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "XRPUSDT");
        assert_eq!(candidates[0].score, dec!(100));

        // SOLUSDT (47.5) ranks first but is not listed on the venue
        let report = orchestrator.run_cycle().await;
        assert_eq!(report.candidates, 3);
        assert_eq!(report.considered, 1);
        assert_eq!(report.rejections, vec![RejectionReason::InvalidCandidate]);
        assert!(fx.ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_aborts_cycle() {
        let fx = fixture().await;
        let orchestrator = orchestrator(&fx, OrchestratorConfig::default(), Arc::new(Failing));

        let report = orchestrator.run_cycle().await;

        assert!(report.error.unwrap().contains("scanner offline"));
        let metrics = fx.metrics.snapshot();
        assert_eq!(metrics.cycles_run, 1);
        assert_eq!(metrics.cycles_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_failure_aborts_before_source() {
        let fx = fixture().await;
        fx.venue.fail_next(GatewayError::Rejected("maintenance".into())).await;
        let source = Arc::new(StaticCandidateSource::once(vec![long("BTCUSDT", dec!(80))]));
        let orchestrator = orchestrator(&fx, OrchestratorConfig::default(), source.clone());

        let report = orchestrator.run_cycle().await;

        assert!(report.error.is_some());
        assert_eq!(report.candidates, 0);
        // The once-source was not drained
        assert_eq!(source.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_times_out_and_blocks_next_ticks() {
        let fx = fixture().await;
        let config = OrchestratorConfig {
            cycle_interval_ms: 1_000,
            cycle_timeout_ms: 2_000,
            ..Default::default()
        };
        let orchestrator = Arc::new(orchestrator(
            &fx,
            config,
            Arc::new(Slow(Duration::from_millis(4_500))),
        ));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&orchestrator).run(rx));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let metrics = fx.metrics.snapshot();
        assert_eq!(metrics.cycles_timed_out, 1);
        assert_eq!(metrics.cycles_run, 0);
        assert!(metrics.cycles_skipped >= 2);

        tx.send(true).unwrap();
        task.await.unwrap();
        // Shutdown waited for the abandoned cycle to finish
        assert_eq!(fx.metrics.snapshot().cycles_run, 1);
    }
}
