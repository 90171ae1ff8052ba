use rand::Rng;
use std::time::Duration;

/// Trait for defining reconnection policies
///
/// A policy is a stateful producer of backoff delays. The socket asks for
/// the next delay after every recoverable disconnect and resets the policy
/// once a connection opens successfully.
pub trait ReconnectionPolicy: Send {
    /// Get the delay before the next reconnection attempt
    ///
    /// # Returns
    /// * `Some(duration)` - Wait this long before reconnecting
    /// * `None` - Stop reconnecting
    fn next_delay(&mut self) -> Option<Duration>;

    /// Reset the policy state (called after a successful connection)
    fn reset(&mut self);
}

/// Exponential backoff reconnection policy
///
/// Delays between reconnection attempts grow exponentially:
/// `initial_delay * 2^attempt`, capped at `max_delay`, with an optional
/// random jitter applied as a `±fraction` of the computed delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<usize>,
    jitter: f64,
    attempt: usize,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff policy without jitter
    ///
    /// # Arguments
    /// * `initial_delay` - The initial delay before the first reconnect
    /// * `max_delay` - The maximum delay between reconnects
    /// * `max_attempts` - Maximum number of attempts (None = unlimited)
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: Option<usize>) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            jitter: 0.0,
            attempt: 0,
        }
    }

    /// Apply a random jitter of `±fraction` to every produced delay
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// The number of delays produced since the last reset
    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    /// 500ms base, 20s cap, ±10% jitter, unlimited attempts
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(20), None).with_jitter(0.1)
    }
}

impl ReconnectionPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }

        let base = self.initial_delay.as_millis() as u64;
        let multiplier = 1u64 << self.attempt.min(63) as u32;
        let delay = base
            .saturating_mul(multiplier)
            .min(self.max_delay.as_millis() as u64);
        self.attempt += 1;

        let delay = Duration::from_millis(delay);
        if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            Some(delay.mul_f64(factor))
        } else {
            Some(delay)
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Fixed delay reconnection policy
///
/// Always waits the same amount of time between reconnection attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<usize>,
    attempt: usize,
}

impl FixedDelay {
    /// Create a new fixed delay policy
    ///
    /// # Arguments
    /// * `delay` - The fixed delay between reconnects
    /// * `max_attempts` - Maximum number of attempts (None = unlimited)
    pub fn new(delay: Duration, max_attempts: Option<usize>) -> Self {
        Self {
            delay,
            max_attempts,
            attempt: 0,
        }
    }
}

impl ReconnectionPolicy for FixedDelay {
    fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Never reconnect policy
///
/// The socket will not attempt to reconnect after a disconnection.
#[derive(Debug, Clone)]
pub struct NeverReconnect;

impl ReconnectionPolicy for NeverReconnect {
    fn next_delay(&mut self) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}
