use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// A gate granting at most one slot per interval.
///
/// The interval bounds how often a cycle can start, not how long it lasts.
/// All callers sharing a limiter are served in order, one slot each.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a [`RateLimiter`] granting one slot per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Returns the interval between two slots.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspends the caller until the next slot is available.
    ///
    /// The first slot is granted immediately.
    pub async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;

        let now = Instant::now();
        let granted = match *next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };

        if granted > now {
            sleep_until(granted).await;
        }

        *next_slot = Some(granted + self.interval);
    }
}
