use async_trait::async_trait;
use meridian_core::TradeCandidate;
use rust_decimal::Decimal;

use crate::error::SourceError;

/// Port for the market scanner/scorer
///
/// Called once per cycle. An empty list is a normal outcome.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn get_candidates(&self) -> Result<Vec<TradeCandidate>, SourceError>;
}

/// Optional score post-processing applied before selection
///
/// Returns the adjusted score; values outside 0..=100 are clamped by the caller.
pub trait ScoreAdjuster: Send + Sync {
    fn adjust(&self, candidate: &TradeCandidate) -> Decimal;
}
