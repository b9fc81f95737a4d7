use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock timestamps for session records.
///
/// `System` reads the OS clock. `Anchored` pins a wall time to a tokio
/// `Instant` and advances with the runtime clock, so timestamps stay in step
/// with tick and pause measurements when the runtime clock is paused.
#[derive(Debug, Clone, Copy)]
pub enum SessionClock {
    System,
    Anchored {
        wall_origin: DateTime<Utc>,
        mono_origin: Instant,
    },
}

impl Default for SessionClock {
    fn default() -> Self {
        SessionClock::System
    }
}

impl SessionClock {
    pub fn system() -> Self {
        SessionClock::System
    }

    pub fn anchored() -> Self {
        SessionClock::Anchored {
            wall_origin: Utc::now(),
            mono_origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match *self {
            SessionClock::System => Utc::now(),
            SessionClock::Anchored {
                wall_origin,
                mono_origin,
            } => {
                let offset = chrono::Duration::from_std(mono_origin.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                wall_origin + offset
            }
        }
    }

    /// Whole seconds between `start` and now, never negative.
    pub fn secs_since(&self, start: DateTime<Utc>) -> u64 {
        (self.now() - start).num_seconds().max(0) as u64
    }
}
