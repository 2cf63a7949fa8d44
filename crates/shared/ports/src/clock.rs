use meridian_core::Timestamp;

/// Port for time abstraction
///
/// Risk cooldowns, daily rollover and order deadlines all read time through
/// this trait so tests can drive them deterministically:
/// - Real system time for production
/// - A manually advanced clock for unit tests
/// - A clock tied to the tokio timer for paused-time tests
pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> Timestamp;

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}
