//! Engine control surface
//!
//! Wires every component from one [`EngineConfig`] and owns the two
//! long-running tasks:
//!
//! ```text
//!   start() ── restore ─► reconcile ─► spawn ┬─► Orchestrator::run  (cycles)
//!                                            └─► PositionMonitor::run (ticks)
//!   stop()  ── watch(true) ─► join both
//! ```
//!
//! Open positions survive `stop()`; the next `start()` (or a new process
//! pointed at the same store) restores and reconciles them.

use chrono::{DateTime, Utc};
use log::{info, warn};
use meridian_clock::SystemClock;
use meridian_core::{PortfolioRiskState, PositionId};
use meridian_gateway::ExchangeGateway;
use meridian_order_manager::{OrderExecutor, PositionLedger, PositionMonitor};
use meridian_ports::{
    CandidateSource, Clock, CorrelationFilter, FundingSignal, Notifier, PositionStore,
    ScoreAdjuster,
};
use meridian_risk_manager::{PortfolioRiskBook, ReturnsCorrelation, RiskGate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::{EngineMetrics, MetricsNotifier, MetricsRegistry};
use crate::orchestrator::{CycleReport, Orchestrator};
use crate::sinks::{LogNotifier, MemoryStore};

/// Closes needed before the returns correlation trusts a pair
const CORRELATION_MIN_OVERLAP: usize = 10;

/// What `force_close` should close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceCloseTarget {
    Position(PositionId),
    All,
}

/// Snapshot returned by [`Engine::get_status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub open_positions_count: usize,
    pub portfolio_risk_state: PortfolioRiskState,
    pub metrics: EngineMetrics,
}

struct Running {
    shutdown: watch::Sender<bool>,
    orchestrator: JoinHandle<()>,
    monitor: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

// ============================================================================
// Builder
// ============================================================================

/// Collaborators for an [`Engine`]; everything but the gateway and the
/// candidate source has a default
pub struct EngineBuilder {
    config: EngineConfig,
    gateway: Arc<dyn ExchangeGateway>,
    source: Arc<dyn CandidateSource>,
    store: Option<Arc<dyn PositionStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    correlation: Option<Arc<dyn CorrelationFilter>>,
    funding: Option<Arc<dyn FundingSignal>>,
    adjuster: Option<Arc<dyn ScoreAdjuster>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    /// In-memory store when not set
    pub fn with_store(mut self, store: Arc<dyn PositionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// [`LogNotifier`] when not set
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Returns-based correlation when not set
    pub fn with_correlation(mut self, correlation: Arc<dyn CorrelationFilter>) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_funding(mut self, funding: Arc<dyn FundingSignal>) -> Self {
        self.funding = Some(funding);
        self
    }

    pub fn with_score_adjuster(mut self, adjuster: Arc<dyn ScoreAdjuster>) -> Self {
        self.adjuster = Some(adjuster);
        self
    }

    /// [`SystemClock`] when not set
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the config and wire the components
    ///
    /// Initial equity is the exchange balance.
    pub async fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let account = self.gateway.get_account_state().await?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = Arc::new(MetricsRegistry::new());
        let downstream = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let notifier: Arc<dyn Notifier> =
            Arc::new(MetricsNotifier::new(Arc::clone(&metrics), downstream));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let correlation = self
            .correlation
            .unwrap_or_else(|| Arc::new(ReturnsCorrelation::new(CORRELATION_MIN_OVERLAP)));

        let book = Arc::new(
            PortfolioRiskBook::new(config.risk.clone(), account.balance, clock.now())
                .with_notifier(Arc::clone(&notifier)),
        );
        let ledger = Arc::new(
            PositionLedger::new(
                self.gateway,
                store,
                Arc::clone(&book),
                notifier,
                clock,
            )
            .with_fees(config.fees.clone())
            .with_config(config.ledger.clone()),
        );

        let mut monitor = PositionMonitor::new(Arc::clone(&ledger), config.monitor.clone());
        if let Some(funding) = self.funding {
            monitor = monitor.with_funding(funding);
        }

        let mut orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&ledger),
            RiskGate::new(config.risk.clone(), correlation),
            OrderExecutor::new(Arc::clone(&ledger), config.execution.clone()),
            self.source,
            Arc::clone(&metrics),
        );
        if let Some(adjuster) = self.adjuster {
            orchestrator = orchestrator.with_score_adjuster(adjuster);
        }

        info!("[ENGINE] Built (equity {})", account.balance);
        Ok(Engine {
            config,
            book,
            ledger,
            monitor: Arc::new(monitor),
            orchestrator: Arc::new(orchestrator),
            metrics,
            running: Mutex::new(None),
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    config: EngineConfig,
    book: Arc<PortfolioRiskBook>,
    ledger: Arc<PositionLedger>,
    monitor: Arc<PositionMonitor>,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<MetricsRegistry>,
    running: Mutex<Option<Running>>,
}

impl Engine {
    pub fn builder(
        config: EngineConfig,
        gateway: Arc<dyn ExchangeGateway>,
        source: Arc<dyn CandidateSource>,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            gateway,
            source,
            store: None,
            notifier: None,
            correlation: None,
            funding: None,
            adjuster: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn book(&self) -> &Arc<PortfolioRiskBook> {
        &self.book
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn monitor(&self) -> &Arc<PositionMonitor> {
        &self.monitor
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Restore, reconcile and start the cycle and monitor loops
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let restored = self.ledger.restore().await?;
        let report = self.ledger.reconcile().await?;
        self.book.update_equity(report.balance).await;
        info!(
            "[ENGINE] Starting: {} restored, {} adopted, {} closed externally, {} resized",
            restored,
            report.adopted.len(),
            report.closed.len(),
            report.resized.len()
        );

        let (shutdown, rx) = watch::channel(false);
        let monitor = tokio::spawn(Arc::clone(&self.monitor).run(rx.clone()));
        let orchestrator = tokio::spawn(Arc::clone(&self.orchestrator).run(rx));
        *running = Some(Running {
            shutdown,
            orchestrator,
            monitor,
            started_at: self.ledger.clock().now(),
        });
        Ok(())
    }

    /// Signal both loops and wait for them; open positions stay open
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(EngineError::NotRunning);
        };
        info!("[ENGINE] Stopping");
        // Receivers treat a dropped sender as shutdown too
        let _ = running.shutdown.send(true);

        let orchestrator = running.orchestrator.await;
        let monitor = running.monitor.await;
        if let Err(e) = orchestrator.and(monitor) {
            warn!("[ENGINE] Task failed during shutdown: {}", e);
            return Err(EngineError::Task(e.to_string()));
        }
        info!("[ENGINE] Stopped with {} open positions", self.ledger.len());
        Ok(())
    }

    pub async fn get_status(&self) -> EngineStatus {
        let started_at = self.running.lock().await.as_ref().map(|r| r.started_at);
        EngineStatus {
            running: started_at.is_some(),
            started_at,
            open_positions_count: self.ledger.len(),
            portfolio_risk_state: self.book.snapshot().await,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Close with `Manual`; returns the ids fully closed
    pub async fn force_close(&self, target: ForceCloseTarget) -> Result<Vec<PositionId>> {
        match target {
            ForceCloseTarget::Position(id) => {
                let outcome = self.monitor.force_close(id).await?;
                if outcome.fully_closed {
                    Ok(vec![id])
                } else {
                    warn!("[ENGINE] {} only partially closed", id);
                    Ok(Vec::new())
                }
            }
            ForceCloseTarget::All => Ok(self.monitor.force_close_all().await),
        }
    }

    /// Run one cycle inline, whether or not the loops are running
    pub async fn run_cycle_once(&self) -> CycleReport {
        self.orchestrator.run_cycle().await
    }
}
