use async_trait::async_trait;
use meridian_core::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Next funding settlement for a perpetual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInfo {
    /// Rate per settlement; positive means longs pay shorts
    pub rate: Decimal,
    pub next_settlement: Timestamp,
}

/// Port for funding-rate information
#[async_trait]
pub trait FundingSignal: Send + Sync {
    async fn next_funding(&self, symbol: &str) -> Option<FundingInfo>;
}
