//! Error types for the tunnel engine.

/// Errors surfaced by the engine and its external collaborators.
///
/// Stale lease updates are *not* errors; they are silently ignored by the
/// reconciliation state machine. Every failure here is contained at the
/// channel-connect boundary: the fleet only ever observes open or closed
/// connects.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// A service call failed. `retryable` distinguishes transient outages
    /// (retried with backoff, channel stays open) from terminal failures.
    #[error("service error: {message}")]
    Service {
        /// Human-readable failure description.
        message: String,
        /// Whether the call may be retried.
        retryable: bool,
    },

    /// Reading or writing a durable checkpoint failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// The processor factory refused or failed to build a processor.
    #[error("processor creation failed: {0}")]
    ProcessorCreation(String),

    /// The processing callback raised an unrecoverable error.
    #[error("processing failed: {0}")]
    Processing(String),

    /// The shared worker pools were closed while work was pending.
    #[error("worker pools closed")]
    PoolClosed,

    /// The tunnel is shut down.
    #[error("tunnel is shut down")]
    Shutdown,
}

impl TunnelError {
    /// Convenience constructor for a retryable service error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
            retryable: true,
        }
    }

    /// Convenience constructor for a non-retryable service error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns `true` if the operation may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Service { retryable: true, .. })
    }
}
