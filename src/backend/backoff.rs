//! Exponential backoff between model-call attempts.
//!
//! [`BackoffConfig`] decides how many times the gateway calls the provider
//! and how long it waits between calls. The default is deterministic:
//! attempt `n` (0-based) that fails is followed by a sleep of
//! `initial_delay * 2^n` when another attempt remains.

use std::time::Duration;

/// Retry budget and delay schedule for model calls.
///
/// # Example
///
/// ```
/// use llm_agent::backend::BackoffConfig;
/// use std::time::Duration;
///
/// let config = BackoffConfig::new(3, Duration::from_secs(1));
/// assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
/// assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Total number of attempts, including the first. Never below 1.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each failure. Default: 2.0.
    pub multiplier: f64,

    /// Upper bound for a single delay. Default: 60 seconds.
    pub max_delay: Duration,

    /// Jitter strategy. Default: None.
    pub jitter: JitterStrategy,
}

/// Jitter strategy for callers sharing a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// `max_attempts` attempts, doubling from `initial_delay`, no jitter.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::None,
        }
    }

    /// A single attempt, never sleeps.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Set the jitter strategy.
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay that follows failed attempt N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is then applied according to the configured strategy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }

    /// Sum of every sleep taken when all attempts fail.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
