//! Minimum-interval gate shared by concurrent workers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Blocks callers so that consecutive passes are at least `interval` apart.
///
/// The lock is held while sleeping, so concurrent workers pass one at a time and can
/// never burst past the interval. A zero interval disables the gate.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait for this caller's turn.
    pub fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        // A poisoned lock only means another worker panicked mid-wait; the timestamp is
        // still usable.
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}
