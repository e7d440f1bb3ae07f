//! # Retry Backoff
//!
//! Bounded retry policy for optimistic-concurrency conflicts.
//!
//! Delays follow a Fibonacci progression (base, base, 2x, 3x, 5x, ...) capped
//! at a maximum, and each delay is jittered into `[delay / 2, delay]` so that
//! two writers racing on the same object do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Default number of attempts (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default first delay between attempts
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
/// Default cap on a single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// How many times a conflicting write is attempted and how long to wait between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Always at least 1.
    pub max_attempts: u32,
    /// First delay
    pub base_delay: Duration,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` and no delay between attempts
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Fresh backoff sequence for one retry loop
    #[must_use]
    pub fn backoff(&self) -> FibonacciBackoff {
        FibonacciBackoff::new(self.base_delay, self.max_delay)
    }

    /// Attempts to make, never zero
    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value
    prev: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            prev: Duration::ZERO,
            current: min.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Next backoff with jitter applied
    pub fn next_jittered(&mut self) -> Duration {
        jitter(self.next_backoff())
    }
}

/// Random duration in `[delay / 2, delay]`
pub fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let half = delay / 2;
    let spread = u64::try_from((delay - half).as_micros()).unwrap_or(u64::MAX);
    half + Duration::from_micros(rand::thread_rng().gen_range(0..=spread))
}
