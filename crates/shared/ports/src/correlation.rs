use meridian_core::TradeCandidate;

/// Port for correlation lookups used by the risk gate
pub trait CorrelationFilter: Send + Sync {
    /// Largest absolute correlation between `symbol` and any of `against`
    ///
    /// Returns 0.0 when `against` is empty or nothing is known about a pair.
    fn max_abs_correlation(&self, symbol: &str, against: &[String]) -> f64;

    /// Feed market data carried by a candidate (close history)
    fn observe(&self, _candidate: &TradeCandidate) {}
}
