//! Meridian Runner
//!
//! Turns the components into a running engine:
//!
//! - **Orchestrator**: the periodic scan, select, execute cycle
//! - **Engine**: builder, start/stop, status and force-close
//! - **Config**: one JSON document for every component
//! - **Sinks**: log / broadcast notifiers, in-memory and JSON-file stores
//! - **Metrics**: counters for cycles, rejections, executions and closes
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!                    │ CandidateSource  │
//!                    └────────┬─────────┘
//!                             │ every cycle_interval
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            ENGINE                               │
//! │                                                                 │
//! │  ┌──────────────────┐   approved    ┌──────────────────┐        │
//! │  │   Orchestrator   │──────────────►│  OrderExecutor   │        │
//! │  │  (RiskGate)      │               └────────┬─────────┘        │
//! │  └────────┬─────────┘                        │ filled           │
//! │           │ reconcile                        ▼                  │
//! │           │                         ┌──────────────────┐        │
//! │           └────────────────────────►│  PositionLedger  │◄──┐    │
//! │                                     └────────┬─────────┘   │    │
//! │                                              │      PositionMonitor
//! └──────────────────────────────────────────────┼──────────────────┘
//!                                                ▼
//!                                    ┌───────────────────────┐
//!                                    │  ExchangeGateway      │
//!                                    │  (retrying, paper)    │
//!                                    └───────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod sinks;
pub mod source;

// Re-export main types
pub use config::{EngineConfig, OrchestratorConfig, PaperSymbol, PaperVenueConfig, RetryConfig};
pub use engine::{Engine, EngineBuilder, EngineStatus, ForceCloseTarget};
pub use error::{ConfigError, EngineError, Result};
pub use metrics::{EngineMetrics, MetricsNotifier, MetricsRegistry};
pub use orchestrator::{CycleReport, Orchestrator};
pub use sinks::{ChannelNotifier, FanoutNotifier, JsonFileStore, LogNotifier, MemoryStore};
pub use source::StaticCandidateSource;
