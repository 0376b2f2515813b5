//! Per-channel lease reconciliation.
//!
//! A [`ChannelConnect`] wraps one channel pipeline with the negotiation
//! state machine: it accepts heartbeat-reported [`Channel`] snapshots,
//! decides whether to keep running, drain, or force-close, and reports a
//! version-bumped snapshot back once local shutdown completes.
//!
//! The negotiated snapshot (`current`) and the local execution state
//! (`local`) are distinct: the service can consider a channel CLOSING
//! while records are still being drained locally, and the connect can be
//! fully torn down while the service still reports the channel OPEN.
//!
//! All mutations go through one mutex (single writer per connect); the
//! heartbeat thread and the channel's own task never race on the state.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelId, ChannelStatus, LocalStatus};
use crate::metrics::{ChannelMetrics, ChannelMetricsSnapshot};
use crate::pipeline::{PipelineExit, PipelineHandle, PipelineLauncher};

/// One channel's negotiation-and-execution unit.
pub struct ChannelConnect {
    id: ChannelId,
    metrics: Arc<ChannelMetrics>,
    state: Mutex<ConnectState>,
}

struct ConnectState {
    /// Last negotiated snapshot; `None` until the service first reports
    /// this channel.
    current: Option<Channel>,
    /// Local execution state.
    local: LocalStatus,
    /// Status a pending drain finalizes to.
    target: ChannelStatus,
    /// Pipeline wiring, consumed when the first `OPEN` arrives.
    launcher: Option<PipelineLauncher>,
    /// Running (or stopped) pipeline, present once launched.
    pipeline: Option<PipelineHandle>,
}

impl ChannelConnect {
    /// Creates a connect whose pipeline starts on the first `OPEN`.
    pub(crate) fn new(
        id: ChannelId,
        launcher: PipelineLauncher,
        metrics: Arc<ChannelMetrics>,
    ) -> Self {
        Self {
            id,
            metrics,
            state: Mutex::new(ConnectState {
                current: None,
                local: LocalStatus::Running,
                target: ChannelStatus::Close,
                launcher: Some(launcher),
                pipeline: None,
            }),
        }
    }

    /// Creates an already-closed connect (dial failure). The fleet treats
    /// it like any other closed channel; no special-casing required.
    pub(crate) fn born_closed(id: ChannelId) -> Self {
        let current = Channel::new(id.clone(), 0, ChannelStatus::Close);
        Self {
            id,
            metrics: Arc::new(ChannelMetrics::default()),
            state: Mutex::new(ConnectState {
                current: Some(current),
                local: LocalStatus::Closed,
                target: ChannelStatus::Close,
                launcher: None,
                pipeline: None,
            }),
        }
    }

    /// The channel this connect negotiates for.
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Last negotiated snapshot, if any.
    #[must_use]
    pub fn current_channel(&self) -> Option<Channel> {
        self.state.lock().current.clone()
    }

    /// Local execution state.
    #[must_use]
    pub fn local_status(&self) -> LocalStatus {
        self.state.lock().local
    }

    /// Snapshot of this channel's counters.
    #[must_use]
    pub fn metrics(&self) -> ChannelMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Applies one service-reported snapshot for this channel.
    ///
    /// Stale versions are ignored entirely. Same-version reports follow
    /// the reconciliation rules below; a strictly newer version is applied
    /// through the same status-pair rules with the remote version as the
    /// new base, so the stored version never regresses.
    pub fn notify_status(&self, remote: &Channel) {
        let mut state = self.state.lock();

        let Some(current) = state.current.clone() else {
            self.adopt_fresh(&mut state, remote);
            return;
        };

        if remote.version < current.version {
            debug!(
                channel = %self.id,
                remote_version = remote.version,
                current_version = current.version,
                "stale channel update ignored"
            );
            return;
        }

        match (current.status, remote.status) {
            // WAIT is a service-side holding state; it is never adopted.
            (_, ChannelStatus::Wait) => {
                debug!(channel = %self.id, "WAIT snapshot ignored");
            }

            // Running lease re-confirmed, possibly at a newer version.
            (ChannelStatus::Open, ChannelStatus::Open) => {
                if remote.version > current.version {
                    state.current = Some(remote.clone());
                }
            }

            // Graceful close request: adopt CLOSING and start draining.
            (ChannelStatus::Open, ChannelStatus::Closing) => {
                info!(
                    channel = %self.id,
                    version = remote.version,
                    "close requested, draining channel"
                );
                state.current = Some(remote.clone());
                state.local = LocalStatus::Closing;
                state.target = ChannelStatus::Close;
                cancel_pipeline(&state);
            }

            // Hard close or termination: adopt as-is and tear down.
            (ChannelStatus::Open, ChannelStatus::Close | ChannelStatus::Terminated) => {
                info!(
                    channel = %self.id,
                    version = remote.version,
                    status = %remote.status,
                    "channel closed by service"
                );
                state.current = Some(remote.clone());
                state.local = LocalStatus::Closed;
                cancel_pipeline(&state);
            }

            // Mid-drain, a TERMINATED report upgrades the drain target;
            // everything else waits for the drain to finalize.
            (ChannelStatus::Closing, ChannelStatus::Terminated) => {
                state.target = ChannelStatus::Terminated;
            }
            (ChannelStatus::Closing, _) => {}

            // Already closed locally; the service is catching up.
            (ChannelStatus::Close, ChannelStatus::Close) => {
                if remote.version > current.version {
                    state.current = Some(remote.clone());
                }
            }
            (ChannelStatus::Close, ChannelStatus::Open | ChannelStatus::Closing) => {
                // Re-acknowledge the close under the reported version.
                state.current = Some(Channel::new(
                    self.id.clone(),
                    remote.version + 1,
                    ChannelStatus::Close,
                ));
            }
            (ChannelStatus::Close, ChannelStatus::Terminated) => {
                state.current = Some(remote.clone());
            }

            (ChannelStatus::Terminated, ChannelStatus::Terminated) => {
                if remote.version > current.version {
                    state.current = Some(remote.clone());
                }
            }
            (ChannelStatus::Terminated, ChannelStatus::Open | ChannelStatus::Closing) => {
                state.current = Some(Channel::new(
                    self.id.clone(),
                    remote.version + 1,
                    ChannelStatus::Terminated,
                ));
            }
            // Compatibility: a same-version CLOSE report overwrites
            // TERMINATED outright. See DESIGN.md before relying on this.
            (ChannelStatus::Terminated, ChannelStatus::Close) => {
                state.current = Some(remote.clone());
            }

            // WAIT is never stored, so these arms cannot be reached.
            (ChannelStatus::Wait, _) => {}
        }
    }

    /// Makes progress on a pending shutdown.
    ///
    /// Detects a pipeline that stopped on its own (end-of-stream or
    /// processing failure) and finalizes a graceful drain once teardown,
    /// including the processor `shutdown()` hook, is complete. Each
    /// finalize bumps the stored version by exactly 1, signalling to the
    /// service that local cleanup is done. A no-op while running normally.
    pub fn check_and_update_status(&self) {
        let mut state = self.state.lock();
        match state.local {
            LocalStatus::Closed => {}

            LocalStatus::Running => {
                let Some(exit) = state.pipeline.as_ref().and_then(PipelineHandle::exit_reason)
                else {
                    return;
                };
                let target = match exit {
                    PipelineExit::Drained => ChannelStatus::Terminated,
                    PipelineExit::Failed | PipelineExit::Cancelled => ChannelStatus::Close,
                };
                info!(channel = %self.id, exit = ?exit, "channel closed itself");
                finalize(&self.id, &mut state, target);
            }

            LocalStatus::Closing => {
                let torn_down = state
                    .pipeline
                    .as_ref()
                    .is_none_or(|pipeline| pipeline.exit_reason().is_some());
                if torn_down {
                    let target = state.target;
                    finalize(&self.id, &mut state, target);
                }
            }
        }
    }

    /// Forces immediate teardown and waits for it to complete.
    ///
    /// Used when the owning tunnel state machine is itself shutting down.
    /// The in-flight process call, if any, still finishes naturally and
    /// the processor `shutdown()` hook still runs before this returns.
    pub async fn close(&self) {
        let join = {
            let mut state = self.state.lock();
            state.launcher = None;
            cancel_pipeline(&state);
            if state.local != LocalStatus::Closed {
                let target = if state.local == LocalStatus::Closing {
                    state.target
                } else {
                    ChannelStatus::Close
                };
                finalize(&self.id, &mut state, target);
            }
            state.pipeline.as_mut().and_then(PipelineHandle::take_join)
        };

        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(channel = %self.id, error = %e, "pipeline task join failed");
            }
        }
    }

    /// Handles the first report for a channel nothing was negotiated for
    /// yet.
    fn adopt_fresh(&self, state: &mut ConnectState, remote: &Channel) {
        match remote.status {
            ChannelStatus::Wait => {
                debug!(channel = %self.id, "WAIT snapshot ignored");
            }
            ChannelStatus::Open => {
                info!(channel = %self.id, version = remote.version, "channel opened");
                state.current = Some(remote.clone());
                state.local = LocalStatus::Running;
                if let Some(launcher) = state.launcher.take() {
                    state.pipeline = Some(launcher.spawn());
                }
            }
            ChannelStatus::Close | ChannelStatus::Terminated => {
                state.current = Some(remote.clone());
                state.local = LocalStatus::Closed;
            }
            ChannelStatus::Closing => {
                // Never opened: a close request is already satisfied.
                state.current = Some(Channel::new(
                    self.id.clone(),
                    remote.version + 1,
                    ChannelStatus::Close,
                ));
                state.local = LocalStatus::Closed;
            }
        }
    }
}

impl std::fmt::Debug for ChannelConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChannelConnect")
            .field("id", &self.id)
            .field("current", &state.current)
            .field("local", &state.local)
            .finish_non_exhaustive()
    }
}

/// Requests cooperative pipeline teardown, if a pipeline was launched.
fn cancel_pipeline(state: &ConnectState) {
    if let Some(pipeline) = &state.pipeline {
        pipeline.cancel();
    }
}

/// Completes a local close: bumps the version by exactly 1 and records
/// `target` as the final negotiated status.
fn finalize(id: &ChannelId, state: &mut ConnectState, target: ChannelStatus) {
    if let Some(current) = &state.current {
        let next = Channel::new(id.clone(), current.version + 1, target);
        info!(
            channel = %id,
            version = next.version,
            status = %next.status,
            "local close finalized"
        );
        state.current = Some(next);
    }
    state.local = LocalStatus::Closed;
}
