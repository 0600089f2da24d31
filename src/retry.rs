//! Polling limits shared by the handshake and the dispatcher.
//!
//! The values must match the device's own timeout assumptions, they bound
//! the worst case latency of every exchange.

use core::time::Duration;

/// How often and how patiently the host polls the device.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on every polling loop.
    pub max_attempts: u32,
    /// First backoff sleep, also the pause between two ENQ reads.
    pub min_timeout: Duration,
    /// Growth factor of the backoff sleep. A negative or NaN factor keeps
    /// the sleep constant, growth past `Duration::MAX` saturates.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS: u32 = 12;
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(50);
    pub const BACKOFF_MULTIPLIER: f64 = 1.5;

    /// The sleeps of one polling loop, in order.
    pub fn backoff(&self) -> RetryState {
        RetryState {
            attempts: 0,
            max_attempts: self.max_attempts,
            timeout: self.min_timeout,
            multiplier: self.backoff_multiplier,
        }
    }

    /// Total time spent sleeping by a polling loop that never succeeds.
    pub fn worst_case_wait(&self) -> Duration {
        self.backoff()
            .fold(Duration::from_secs(0), Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::MAX_ATTEMPTS,
            min_timeout: Self::MIN_TIMEOUT,
            backoff_multiplier: Self::BACKOFF_MULTIPLIER,
        }
    }
}

/// State of a single polling loop. Yields the next sleep until the attempt
/// budget is spent.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    timeout: Duration,
    multiplier: f64,
}

impl RetryState {
    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Iterator for RetryState {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let sleep = self.timeout;
        self.attempts += 1;
        self.timeout = scale(self.timeout, self.multiplier);
        Some(sleep)
    }
}

fn scale(timeout: Duration, multiplier: f64) -> Duration {
    let secs = timeout.as_secs_f64() * multiplier;
    if secs.is_nan() || secs < 0.0 {
        timeout
    } else if secs == 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
