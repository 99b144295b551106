//! Capped exponential backoff for bridge reconnection.
//!
//! The upstream `run_event_loop` pattern this is grounded on retries on a
//! fixed delay with no cap; a bridge to a remote broker that is down for an
//! extended period should not hammer it at a constant rate, so this
//! generalizes the fixed delay into a doubling delay with a ceiling and a
//! small jitter to avoid synchronized reconnect storms across many bridges.

use std::time::Duration;

const INITIAL: Duration = Duration::from_secs(1);
const MAX: Duration = Duration::from_secs(60);

pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { current: INITIAL }
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the delay back to the initial value after a successful connection.
    pub fn reset(&mut self) {
        self.current = INITIAL;
    }

    /// Returns the delay to wait before the next attempt, then doubles it
    /// (capped at `MAX`) for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let jitter_ms = rand::random::<u64>() % 250;
        let delay = self.current + Duration::from_millis(jitter_ms);
        self.current = (self.current * 2).min(MAX);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_cap() {
        let mut b = Backoff::new();
        for _ in 0..10 {
            b.next_delay();
        }
        assert!(b.current <= MAX);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = Backoff::new();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.current, INITIAL);
    }
}
