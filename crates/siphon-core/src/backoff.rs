//! Exponential backoff for transient read failures.

use std::time::Duration;

use tracing::debug;

use crate::config::RetryConfig;

/// Tracks retry state for one sequence of transient failures.
///
/// Delays grow by the configured multiplier up to a cap, with optional
/// deterministic jitter derived from the attempt counter. A successful
/// call resets the sequence via [`RetryBackoff::reset`].
pub struct RetryBackoff {
    config: RetryConfig,
    attempt: u32,
    current_delay: Duration,
}

impl RetryBackoff {
    /// Creates a backoff tracker from retry settings.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            current_delay: initial_delay,
        }
    }

    /// Returns the current retry attempt count.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns whether the retry budget has been exhausted.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.config
            .max_retries
            .is_some_and(|max| self.attempt >= max)
    }

    /// Resets the retry state after a successful call.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Computes the next delay, or `None` once the retry budget is spent.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            debug!(
                attempts = self.attempt,
                max = ?self.config.max_retries,
                "retry budget exhausted"
            );
            return None;
        }

        self.attempt += 1;

        let delay = self.current_delay;

        // Jitter: ±25% of the delay, derived from the attempt counter so
        // concurrent channels retrying from the same failure de-align.
        let delay = if self.config.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            let jitter_offset =
                (f64::from(self.attempt) * 7.0 % jitter_range.max(1.0)) - (jitter_range / 2.0);
            let jittered_ms = (delay.as_millis() as f64 + jitter_offset).max(1.0);
            Duration::from_millis(jittered_ms as u64)
        } else {
            delay
        };

        let next_ms =
            (self.current_delay.as_millis() as f64 * self.config.backoff_multiplier) as u64;
        self.current_delay = Duration::from_millis(next_ms).min(self.config.max_delay);

        Some(delay)
    }
}

impl std::fmt::Debug for RetryBackoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryBackoff")
            .field("attempt", &self.attempt)
            .field("current_delay", &self.current_delay)
            .finish_non_exhaustive()
    }
}
