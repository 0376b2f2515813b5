//! The heartbeat-driven tunnel worker.
//!
//! Runs as a single task: on every tick it snapshots local channel state,
//! sends the heartbeat RPC, and reconciles the response through the
//! [`TunnelStateMachine`]. Channel dialing, draining, and pruning all
//! happen inside that reconciliation; the worker itself is just the
//! timer and the RPC edge.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use siphon_core::TunnelStateMachine;

use crate::config::WorkerConfig;
use crate::error::ClientError;
use crate::service::TunnelService;

/// Heartbeat loop driving one tunnel client.
pub struct TunnelWorker {
    service: Arc<dyn TunnelService>,
    fleet: Arc<TunnelStateMachine>,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl TunnelWorker {
    pub(crate) fn new(
        service: Arc<dyn TunnelService>,
        fleet: Arc<TunnelStateMachine>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            service,
            fleet,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// The state machine this worker drives. Useful for diagnostics.
    #[must_use]
    pub fn state_machine(&self) -> Arc<TunnelStateMachine> {
        Arc::clone(&self.fleet)
    }

    /// Token that stops the worker when cancelled. The worker finishes
    /// the in-flight tick, closes every channel, and deregisters from
    /// the service before `run` returns.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the heartbeat loop until cancelled or the consecutive
    /// heartbeat failure budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::HeartbeatFailed`] when
    /// [`WorkerConfig::max_heartbeat_failures`] consecutive heartbeats
    /// fail. Cancellation is not an error.
    pub async fn run(self) -> Result<(), ClientError> {
        let tunnel_id = self.fleet.tunnel_id().to_string();
        let client_id = self.fleet.client_id().to_string();

        info!(
            tunnel = %tunnel_id,
            client = %client_id,
            interval_ms = u64::try_from(self.config.heartbeat_interval.as_millis())
                .unwrap_or(u64::MAX),
            "tunnel worker started"
        );

        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut consecutive_failures: u32 = 0;
        let mut result = Ok(());

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!(tunnel = %tunnel_id, "tunnel worker shutdown requested");
                    break;
                }

                _ = interval.tick() => {}
            }

            let current = self.fleet.batch_get_channels();
            debug!(
                tunnel = %tunnel_id,
                channels = current.len(),
                "sending heartbeat"
            );

            match self
                .service
                .heartbeat(&tunnel_id, &client_id, current)
                .await
            {
                Ok(remote) => {
                    consecutive_failures = 0;
                    self.fleet.batch_update_channels(&remote).await;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        tunnel = %tunnel_id,
                        error = %e,
                        failures = consecutive_failures,
                        "heartbeat failed"
                    );
                    if consecutive_failures >= self.config.max_heartbeat_failures {
                        result = Err(ClientError::HeartbeatFailed {
                            attempts: consecutive_failures,
                        });
                        break;
                    }
                }
            }
        }

        // Tear down every channel (blocks until in-flight work finishes),
        // then tell the service we are gone.
        self.fleet.close().await;
        if let Err(e) = self.service.shutdown_tunnel(&tunnel_id, &client_id).await {
            warn!(tunnel = %tunnel_id, error = %e, "shutdown call failed");
        }

        info!(tunnel = %tunnel_id, client = %client_id, "tunnel worker stopped");
        result
    }
}

impl std::fmt::Debug for TunnelWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelWorker")
            .field("fleet", &self.fleet)
            .field("heartbeat_interval", &self.config.heartbeat_interval)
            .finish_non_exhaustive()
    }
}
