//! Correlation filters
//!
//! Two implementations of the `CorrelationFilter` port:
//! - [`StaticCorrelationMatrix`]: a configured symmetric pair table
//! - [`ReturnsCorrelation`]: Pearson correlation of simple returns over the
//!   close history candidates carry

use meridian_core::TradeCandidate;
use meridian_ports::CorrelationFilter;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::RwLock;

/// Fixed pairwise correlations; unknown pairs are uncorrelated
#[derive(Debug, Clone, Default)]
pub struct StaticCorrelationMatrix {
    pairs: HashMap<(String, String), f64>,
}

impl StaticCorrelationMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(mut self, a: &str, b: &str, correlation: f64) -> Self {
        self.set_pair(a, b, correlation);
        self
    }

    pub fn set_pair(&mut self, a: &str, b: &str, correlation: f64) {
        self.pairs.insert(pair_key(a, b), correlation);
    }

    pub fn get(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        self.pairs.get(&pair_key(a, b)).copied().unwrap_or(0.0)
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl CorrelationFilter for StaticCorrelationMatrix {
    fn max_abs_correlation(&self, symbol: &str, against: &[String]) -> f64 {
        against
            .iter()
            .map(|other| self.get(symbol, other).abs())
            .fold(0.0, f64::max)
    }
}

/// Correlation of simple returns computed from observed close histories
///
/// Histories are aligned on their most recent closes. Pairs with fewer than
/// `min_overlap` common returns are treated as uncorrelated.
pub struct ReturnsCorrelation {
    closes: RwLock<HashMap<String, Vec<f64>>>,
    min_overlap: usize,
}

impl ReturnsCorrelation {
    pub fn new(min_overlap: usize) -> Self {
        Self {
            closes: RwLock::new(HashMap::new()),
            min_overlap: min_overlap.max(2),
        }
    }

    pub fn record_closes(&self, symbol: &str, closes: &[Decimal]) {
        let series: Vec<f64> = closes.iter().filter_map(|c| c.to_f64()).collect();
        if series.len() < 2 {
            return;
        }
        let mut map = self
            .closes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(symbol.to_string(), series);
    }

    pub fn correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let map = self
            .closes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match (map.get(a), map.get(b)) {
            (Some(x), Some(y)) => {
                let rx = simple_returns(x);
                let ry = simple_returns(y);
                let n = rx.len().min(ry.len());
                if n < self.min_overlap {
                    return 0.0;
                }
                pearson(&rx[rx.len() - n..], &ry[ry.len() - n..])
            }
            _ => 0.0,
        }
    }
}

impl CorrelationFilter for ReturnsCorrelation {
    fn max_abs_correlation(&self, symbol: &str, against: &[String]) -> f64 {
        against
            .iter()
            .map(|other| self.correlation(symbol, other).abs())
            .fold(0.0, f64::max)
    }

    fn observe(&self, candidate: &TradeCandidate) {
        self.record_closes(&candidate.symbol, &candidate.recent_closes);
    }
}

fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Pearson correlation; 0.0 when either series is flat
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return 0.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}
