//! Error types for the client facade.

use siphon_core::TunnelError;

/// Errors from worker construction and the heartbeat loop.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Builder misconfiguration (missing collaborator, bad settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Connecting the tunnel client failed.
    #[error("connect failed: {0}")]
    Connect(TunnelError),

    /// The heartbeat RPC failed too many consecutive times.
    #[error("heartbeat failed {attempts} consecutive times")]
    HeartbeatFailed {
        /// Number of consecutive failures observed.
        attempts: u32,
    },

    /// An engine-level failure.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}
