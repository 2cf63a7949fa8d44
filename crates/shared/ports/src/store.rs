use async_trait::async_trait;
use meridian_core::Position;

use crate::error::StoreResult;

/// Port for position persistence
///
/// A downstream sink: the engine writes every state change and only reads
/// back on startup.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Upsert the full position record (closed positions included)
    async fn save(&self, position: &Position) -> StoreResult<()>;

    /// Load every position whose status is still active
    async fn load_open_positions(&self) -> StoreResult<Vec<Position>>;
}
