//! Meridian Clock Infrastructure
//!
//! Time sources implementing the `Clock` port:
//!
//! - [`SystemClock`]: wall-clock UTC, used in production
//! - [`ManualClock`]: frozen until advanced, used by unit tests
//! - [`RuntimeClock`]: UTC anchored to the tokio timer, so paused-time tests
//!   (`start_paused = true`) see cooldowns and deadlines move with
//!   `tokio::time::advance`
//!
//! ## Usage
//!
//! ```ignore
//! use meridian_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(start);
//! clock.advance(Duration::minutes(30));
//! assert_eq!(clock.now(), start + Duration::minutes(30));
//! ```

mod manual;
mod runtime;
mod system;

pub use manual::ManualClock;
pub use runtime::RuntimeClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use meridian_ports::Clock;
