//! Engine counters
//!
//! Counters live behind a plain `std::sync::Mutex`: they are touched once
//! per cycle or per event and never held across an `.await`.

use meridian_ports::{EngineEvent, Notifier};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::orchestrator::CycleReport;

/// Counters surfaced through `Engine::get_status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineMetrics {
    pub cycles_run: u64,
    /// Cycles aborted by a reconcile or candidate source failure
    pub cycles_failed: u64,
    /// Cycles that outlived `cycle_timeout`
    pub cycles_timed_out: u64,
    /// Ticks skipped while a previous cycle was still running
    pub cycles_skipped: u64,
    pub candidates_seen: u64,
    pub approvals: u64,
    /// Rejections keyed by reason code
    pub rejections: BTreeMap<String, u64>,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    /// Closes keyed by exit reason code
    pub closes: BTreeMap<String, u64>,
    pub breaker_trips: u64,
}

impl EngineMetrics {
    pub fn record_cycle(&mut self, report: &CycleReport) {
        self.cycles_run += 1;
        if report.error.is_some() {
            self.cycles_failed += 1;
        }
        self.candidates_seen += report.candidates as u64;
        self.approvals += report.approved as u64;
        for reason in &report.rejections {
            *self.rejections.entry(reason.as_str().to_string()).or_default() += 1;
        }
        self.executions_succeeded += report.executed.len() as u64;
        self.executions_failed += report.failed.len() as u64;
    }

    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }

    pub fn total_closes(&self) -> u64 {
        self.closes.values().sum()
    }
}

/// Shared, lock-protected [`EngineMetrics`]
#[derive(Debug, Default)]
pub struct MetricsRegistry(Mutex<EngineMetrics>);

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, EngineMetrics> {
        // Counters stay usable even if a panicking thread held the lock
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, f: impl FnOnce(&mut EngineMetrics)) {
        f(&mut self.guard());
    }

    pub fn snapshot(&self) -> EngineMetrics {
        self.guard().clone()
    }
}

/// Notifier decorator counting closes and breaker trips
pub struct MetricsNotifier {
    metrics: Arc<MetricsRegistry>,
    downstream: Arc<dyn Notifier>,
}

impl MetricsNotifier {
    pub fn new(metrics: Arc<MetricsRegistry>, downstream: Arc<dyn Notifier>) -> Self {
        Self {
            metrics,
            downstream,
        }
    }
}

impl Notifier for MetricsNotifier {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::PositionClosed { reason, .. } => self.metrics.update(|m| {
                *m.closes.entry(reason.as_str().to_string()).or_default() += 1;
            }),
            EngineEvent::CircuitBreakerTripped { .. } => {
                self.metrics.update(|m| m.breaker_trips += 1)
            }
            _ => {}
        }
        self.downstream.emit(event);
    }
}
