//! Notifier and position store implementations
//!
//! Both ports are downstream sinks: the engine writes to them and never
//! reads engine state back, except for the startup restore.
//!
//! ```text
//!   EngineEvent ──► MetricsNotifier ──► FanoutNotifier ─┬─► LogNotifier
//!                                                       └─► ChannelNotifier ──► subscribers
//!
//!   Position ──► JsonFileStore   <dir>/<id>.json  (write tmp, rename)
//!            └─► MemoryStore
//! ```

use async_trait::async_trait;
use log::{info, warn};
use meridian_core::{Position, PositionId};
use meridian_ports::{EngineEvent, Notifier, PositionStore, StoreError, StoreResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Notifiers
// ============================================================================

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::PositionOpened {
                position_id,
                symbol,
                side,
                entry_price,
                quantity,
                leverage,
                is_maker,
            } => info!(
                "[EVENT] Opened {} {} {} @ {} x{} maker={} ({})",
                side.as_str(),
                quantity,
                symbol,
                entry_price,
                leverage,
                is_maker,
                position_id
            ),
            EngineEvent::PositionClosed {
                position_id,
                symbol,
                reason,
                exit_price,
                realized_pnl,
            } => info!(
                "[EVENT] Closed {} @ {} reason={} pnl={} ({})",
                symbol, exit_price, reason, realized_pnl, position_id
            ),
            EngineEvent::CircuitBreakerTripped { reason, until } => {
                warn!("[EVENT] Circuit breaker: {} (until {})", reason, until)
            }
            EngineEvent::ExecutionFailed { symbol, error } => {
                warn!("[EVENT] Execution failed for {}: {}", symbol, error)
            }
            other => match serde_json::to_string(other) {
                Ok(json) => info!("[EVENT] {}", json),
                Err(_) => info!("[EVENT] {:?}", other),
            },
        }
    }
}

/// Fans events out to `tokio::sync::broadcast` subscribers
///
/// Sending never blocks; a subscriber that falls more than `capacity`
/// events behind sees `RecvError::Lagged`.
pub struct ChannelNotifier {
    sender: broadcast::Sender<EngineEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, event: &EngineEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}

/// Forwards each event to every inner notifier in order
#[derive(Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn emit(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Position store kept in memory (lost on restart)
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<PositionId, Position>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<PositionId, Position>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: PositionId) -> Option<Position> {
        self.records().get(&id).cloned()
    }

    /// Every record, closed ones included
    pub fn all(&self) -> Vec<Position> {
        self.records().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn save(&self, position: &Position) -> StoreResult<()> {
        self.records().insert(position.id, position.clone());
        Ok(())
    }

    async fn load_open_positions(&self) -> StoreResult<Vec<Position>> {
        let mut open: Vec<Position> = self
            .records()
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        Ok(open)
    }
}

/// One pretty-printed JSON file per position under a directory
///
/// Each save writes a uniquely named temporary file and renames it over
/// `<id>.json`, so a crash mid-write never leaves a truncated record.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Use `dir`, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;
        info!("[STORE] Persisting positions under {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: PositionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Read back one record regardless of status
    pub async fn load(&self, id: PositionId) -> StoreResult<Option<Position>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

#[async_trait]
impl PositionStore for JsonFileStore {
    async fn save(&self, position: &Position) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(position)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", position.id, Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_error)?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(position.id)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(e));
        }
        Ok(())
    }

    async fn load_open_positions(&self) -> StoreResult<Vec<Position>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_error)?;
        let mut open = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await.map_err(io_error)?;
            match serde_json::from_slice::<Position>(&bytes) {
                Ok(position) if position.is_active() => open.push(position),
                Ok(_) => {}
                Err(e) => warn!("[STORE] Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        open.sort_by_key(|p| p.opened_at);
        Ok(open)
    }
}
