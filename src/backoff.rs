//! Reconnect delay policy of the sync worker.
use std::time::Duration;

use rand::{thread_rng, Rng};

/// Exponential reconnect delay with additive jitter.
///
/// The delay starts at `initial`, doubles after every failed attempt up to `max`, and is reset
/// to `initial` whenever the connection delivers a message. Every returned delay gets a random
/// jitter in `[0, initial)` added on top so that many clients losing the same server don't
/// reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a new backoff starting at `initial` and growing up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Backoff {
        Backoff {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay that will be used for the next attempt, without jitter.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Reset the delay to its initial value.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Return the delay to wait before the next attempt and grow the delay for the attempt after
    /// that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current + jitter(self.initial);
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }
}

/// Random duration in `[0, max)`.
fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    thread_rng().gen_range(Duration::ZERO..max)
}
