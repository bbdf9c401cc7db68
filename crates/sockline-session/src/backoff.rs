//! Reconnection delay schedule.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::ReconnectPolicy;

/// Produces the delay before each reconnection attempt until the policy
/// is exhausted.
///
/// ```
/// use std::time::Duration;
/// use sockline_session::{Backoff, ReconnectPolicy};
///
/// let mut backoff = Backoff::new(ReconnectPolicy {
///     max_attempts: Some(3),
///     ..Default::default()
/// });
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    started: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            started: None,
        }
    }

    /// Attempts handed out since the last [`reset`](Self::reset).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the first attempt of the current run.
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Starts a fresh run.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.started = None;
    }

    /// The delay before the next attempt, or `None` when the policy says
    /// to give up. Counts the attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let started = *self.started.get_or_insert_with(Instant::now);

        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let delay = self.delay_for(self.attempts);
        if let Some(max_elapsed) = self.policy.max_elapsed {
            if started.elapsed().saturating_add(delay) > max_elapsed {
                return None;
            }
        }

        self.attempts += 1;
        Some(delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.policy.base_delay.as_nanos() as f64 * self.policy.multiplier.powi(exponent);
        let cap = self
            .policy
            .max_delay
            .map(|d| d.as_nanos() as f64)
            .unwrap_or(f64::INFINITY);
        let mut nanos = raw.min(cap);
        if self.policy.jitter > 0.0 && nanos.is_finite() {
            let spread = nanos * self.policy.jitter;
            nanos += rand::rng().random_range(-spread..=spread);
        }
        // `as` saturates: infinity becomes u64::MAX nanoseconds.
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}
