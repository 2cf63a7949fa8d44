use chrono::{Duration, Utc};
use meridian_core::Timestamp;
use meridian_ports::Clock;
use tokio::time::Instant;

/// UTC clock driven by the tokio timer
///
/// Reports `anchor + (tokio::time::Instant::now() - start)`. Under a paused
/// runtime this advances exactly as `tokio::time::advance` and auto-advance
/// do; under a normal runtime it tracks wall time.
pub struct RuntimeClock {
    anchor: Timestamp,
    start: Instant,
}

impl RuntimeClock {
    /// Must be called from within a tokio runtime
    pub fn new(anchor: Option<Timestamp>) -> Self {
        Self {
            anchor: anchor.unwrap_or_else(Utc::now),
            start: Instant::now(),
        }
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> Timestamp {
        let elapsed = Instant::now().saturating_duration_since(self.start);
        self.anchor + Duration::from_std(elapsed).unwrap_or_else(|_| Duration::zero())
    }

    fn name(&self) -> &str {
        "RuntimeClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_follows_paused_time() {
        let clock = RuntimeClock::new(None);
        let t0 = clock.now();

        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now() - t0, Duration::seconds(90));

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(clock.now() - t0, Duration::seconds(100));
    }
}
