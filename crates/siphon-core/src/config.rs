//! Engine configuration.

use std::time::Duration;

/// Retry settings for transient read failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Maximum retry attempts before the failure is treated as terminal.
    /// `None` retries indefinitely.
    pub max_retries: Option<u32>,
    /// Whether to jitter delays to avoid retry alignment across channels.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_retries: None,
            jitter: true,
        }
    }
}

/// Configuration for the tunnel engine.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Permits in the shared read pool: at most this many channels have a
    /// read in flight at once.
    pub read_workers: usize,

    /// Permits in the shared process pool: at most this many channels have
    /// a processing call in flight at once.
    pub process_workers: usize,

    /// Retry settings for transient read failures.
    pub retry: RetryConfig,

    /// Pause before the next read when a live channel returns an empty,
    /// non-final batch. Keeps an idle channel from hot-looping against the
    /// record source.
    pub idle_poll_interval: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            read_workers: 4,
            process_workers: 4,
            retry: RetryConfig::default(),
            idle_poll_interval: Duration::from_millis(100),
        }
    }
}
