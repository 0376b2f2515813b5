//! Worker configuration.

use std::time::Duration;

use siphon_core::TunnelConfig;

/// Configuration for the heartbeat-driven tunnel worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,

    /// Consecutive heartbeat failures tolerated before the worker stops.
    pub max_heartbeat_failures: u32,

    /// Engine settings passed through to the state machine.
    pub tunnel: TunnelConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            max_heartbeat_failures: 5,
            tunnel: TunnelConfig::default(),
        }
    }
}
