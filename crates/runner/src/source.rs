//! Static candidate source
//!
//! Serves a fixed list of candidates, either every cycle or only once. The
//! `meridian` binary loads it from a JSON array; tests build it in code.

use async_trait::async_trait;
use log::info;
use meridian_core::TradeCandidate;
use meridian_ports::{CandidateSource, SourceError};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct StaticCandidateSource {
    candidates: Mutex<Vec<TradeCandidate>>,
    /// Hand the list out on the first call only
    once: bool,
}

impl StaticCandidateSource {
    pub fn new(candidates: Vec<TradeCandidate>) -> Self {
        Self {
            candidates: Mutex::new(candidates),
            once: false,
        }
    }

    /// A source that is drained by the first `get_candidates` call
    pub fn once(candidates: Vec<TradeCandidate>) -> Self {
        Self {
            candidates: Mutex::new(candidates),
            once: true,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load a JSON array of candidates
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let candidates: Vec<TradeCandidate> = serde_json::from_str(&content)
            .map_err(|e| SourceError::Malformed(format!("{}: {}", path.display(), e)))?;
        info!(
            "[SOURCE] Loaded {} candidates from {}",
            candidates.len(),
            path.display()
        );
        Ok(Self::new(candidates))
    }

    fn guard(&self) -> MutexGuard<'_, Vec<TradeCandidate>> {
        self.candidates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new list for the following cycles
    pub fn replace(&self, candidates: Vec<TradeCandidate>) {
        *self.guard() = candidates;
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn get_candidates(&self) -> Result<Vec<TradeCandidate>, SourceError> {
        let mut candidates = self.guard();
        if self.once {
            Ok(std::mem::take(&mut *candidates))
        } else {
            Ok(candidates.clone())
        }
    }
}
