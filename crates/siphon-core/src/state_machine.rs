//! Fleet-level channel reconciliation.
//!
//! The [`TunnelStateMachine`] owns every [`ChannelConnect`] of one tunnel
//! client. Each heartbeat turns the service's authoritative channel list
//! into local actions: dial channels we have never seen, forward status to
//! the ones we track, and prune connects that finished closing and
//! dropped out of the report. Channels the service stops reporting are
//! *not* force-removed while still draining; they finish on their own.
//!
//! Failure containment: whatever a single channel does (dial failure,
//! processing error, fatal read), the fleet only ever observes an open or
//! closed connect. Nothing propagates across channels except pressure on
//! the shared worker pools.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelId, LocalStatus};
use crate::checkpoint::CheckpointStore;
use crate::config::TunnelConfig;
use crate::connect::ChannelConnect;
use crate::dialer::ChannelDialer;
use crate::pool::WorkerPools;
use crate::processor::ProcessorFactory;
use crate::source::{RecordSource, ResumeToken};

/// Coordinator for all channels of one tunnel client.
pub struct TunnelStateMachine {
    tunnel_id: String,
    client_id: String,
    dialer: ChannelDialer,
    pools: WorkerPools,
    connects: Mutex<HashMap<ChannelId, Arc<ChannelConnect>>>,
    closed: AtomicBool,
}

impl TunnelStateMachine {
    /// Creates the state machine and its shared worker pools.
    pub fn new(
        tunnel_id: impl Into<String>,
        client_id: impl Into<String>,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn CheckpointStore>,
        factory: Arc<dyn ProcessorFactory>,
        config: TunnelConfig,
    ) -> Self {
        let tunnel_id = tunnel_id.into();
        let client_id = client_id.into();
        let pools = WorkerPools::new(config.read_workers, config.process_workers);
        let dialer = ChannelDialer::new(
            tunnel_id.clone(),
            client_id.clone(),
            source,
            store,
            factory,
            pools.clone(),
            config,
        );
        Self {
            tunnel_id,
            client_id,
            dialer,
            pools,
            connects: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Tunnel this client consumes.
    #[must_use]
    pub fn tunnel_id(&self) -> &str {
        &self.tunnel_id
    }

    /// This client's identity within the tunnel.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Reconciles a heartbeat's authoritative channel list.
    ///
    /// Untracked channels are dialed and added; tracked ones get the
    /// reported snapshot via `notify_status`. Every connect then makes
    /// close progress, and connects that are fully closed *and* absent
    /// from the report are pruned.
    pub async fn batch_update_channels(&self, remote: &[Channel]) {
        if self.closed.load(Ordering::Acquire) {
            debug!(tunnel = %self.tunnel_id, "ignoring channel update after close");
            return;
        }

        // Dial channels we have never seen. The dial awaits external
        // calls, so it happens outside the map lock.
        for channel in remote {
            let tracked = self.connects.lock().contains_key(&channel.id);
            if tracked {
                continue;
            }
            let connect = Arc::new(
                self.dialer
                    .dial(channel.id.clone(), ResumeToken::start())
                    .await,
            );
            self.connects
                .lock()
                .entry(channel.id.clone())
                .or_insert(connect);
        }

        let reported: HashSet<&ChannelId> = remote.iter().map(|c| &c.id).collect();

        let mut connects = self.connects.lock();
        for channel in remote {
            if let Some(connect) = connects.get(&channel.id) {
                connect.notify_status(channel);
            }
        }

        // Make close progress everywhere, then prune connects the service
        // no longer reports once their teardown is complete.
        connects.retain(|id, connect| {
            connect.check_and_update_status();
            let keep =
                connect.local_status() != LocalStatus::Closed || reported.contains(id);
            if !keep {
                info!(tunnel = %self.tunnel_id, channel = %id, "closed channel pruned");
            }
            keep
        });
    }

    /// Applies a single-channel status update. Ids that are not currently
    /// tracked are ignored; only heartbeats dial new channels.
    pub fn update_status(&self, channel: &Channel) {
        let connects = self.connects.lock();
        match connects.get(&channel.id) {
            Some(connect) => {
                connect.notify_status(channel);
                connect.check_and_update_status();
            }
            None => {
                debug!(
                    tunnel = %self.tunnel_id,
                    channel = %channel.id,
                    "status update for untracked channel ignored"
                );
            }
        }
    }

    /// Negotiated snapshots of every tracked channel, with close progress
    /// applied first so pending drains that finished are reflected.
    #[must_use]
    pub fn batch_get_channels(&self) -> Vec<Channel> {
        let connects = self.connects.lock();
        connects
            .values()
            .filter_map(|connect| {
                connect.check_and_update_status();
                connect.current_channel()
            })
            .collect()
    }

    /// Every tracked connect.
    #[must_use]
    pub fn batch_get_connects(&self) -> Vec<Arc<ChannelConnect>> {
        self.connects.lock().values().cloned().collect()
    }

    /// Force-closes every tracked connect, then releases the shared
    /// worker pools. Blocks until each channel has fully torn down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(tunnel = %self.tunnel_id, client = %self.client_id, "tunnel state machine closing");

        let connects: Vec<(ChannelId, Arc<ChannelConnect>)> =
            self.connects.lock().drain().collect();
        for (id, connect) in connects {
            connect.close().await;
            debug!(tunnel = %self.tunnel_id, channel = %id, "channel closed");
        }

        self.pools.close();
        info!(tunnel = %self.tunnel_id, "tunnel state machine closed");
    }
}

impl std::fmt::Debug for TunnelStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelStateMachine")
            .field("tunnel_id", &self.tunnel_id)
            .field("client_id", &self.client_id)
            .field("channels", &self.connects.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::ChannelStatus;
    use crate::config::RetryConfig;
    use crate::testing::{MockCheckpointStore, MockProcessorFactory, MockRecordSource};

    struct Rig {
        source: Arc<MockRecordSource>,
        store: Arc<MockCheckpointStore>,
        factory: Arc<MockProcessorFactory>,
        fleet: TunnelStateMachine,
    }

    fn rig() -> Rig {
        let source = Arc::new(MockRecordSource::new());
        let store = Arc::new(MockCheckpointStore::new());
        let factory = Arc::new(MockProcessorFactory::new());
        let config = TunnelConfig {
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..RetryConfig::default()
            },
            idle_poll_interval: Duration::from_millis(1),
            ..TunnelConfig::default()
        };
        let fleet = TunnelStateMachine::new(
            "tunnel",
            "client",
            Arc::clone(&source) as Arc<dyn RecordSource>,
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            Arc::clone(&factory) as Arc<dyn ProcessorFactory>,
            config,
        );
        Rig {
            source,
            store,
            factory,
            fleet,
        }
    }

    fn open(id: &str, version: u64) -> Channel {
        Channel::new(id, version, ChannelStatus::Open)
    }

    fn running_count(fleet: &TunnelStateMachine) -> usize {
        fleet
            .batch_get_connects()
            .iter()
            .filter(|c| c.local_status() == LocalStatus::Running)
            .count()
    }

    #[tokio::test]
    async fn test_heartbeat_dials_new_channels() {
        let rig = rig();
        rig.fleet
            .batch_update_channels(&[open("a", 0), open("b", 0), open("c", 0), open("d", 0)])
            .await;

        assert_eq!(rig.fleet.batch_get_connects().len(), 4);
        assert_eq!(running_count(&rig.fleet), 4);

        let mut channels = rig.fleet.batch_get_channels();
        channels.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(channels[0], open("a", 0));
        assert_eq!(channels[3], open("d", 0));

        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_closing_channel_drops_open_count() {
        let rig = rig();
        let first = [open("a", 0), open("b", 0), open("c", 0), open("d", 0)];
        rig.fleet.batch_update_channels(&first).await;
        assert_eq!(running_count(&rig.fleet), 4);

        // Next heartbeat asks channel `a` to drain.
        let second = [
            Channel::new("a", 0, ChannelStatus::Closing),
            open("b", 0),
            open("c", 0),
            open("d", 0),
        ];
        rig.fleet.batch_update_channels(&second).await;

        // Reconcile until the drain completes.
        let mut closed = false;
        for _ in 0..500 {
            rig.fleet.batch_update_channels(&second).await;
            let a = rig
                .fleet
                .batch_get_connects()
                .into_iter()
                .find(|c| c.id().as_str() == "a")
                .unwrap();
            if a.local_status() == LocalStatus::Closed {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(closed, "channel a never finished draining");

        assert_eq!(running_count(&rig.fleet), 3);
        let a = rig
            .fleet
            .batch_get_channels()
            .into_iter()
            .find(|c| c.id.as_str() == "a")
            .unwrap();
        assert_eq!(a, Channel::new("a", 1, ChannelStatus::Close));

        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_unreported_closed_channels_are_pruned() {
        let rig = rig();
        rig.fleet
            .batch_update_channels(&[open("a", 0), open("b", 0)])
            .await;

        // `a` drains while still being reported.
        let closing = [Channel::new("a", 0, ChannelStatus::Closing), open("b", 0)];
        for _ in 0..500 {
            rig.fleet.batch_update_channels(&closing).await;
            let connects = rig.fleet.batch_get_connects();
            if connects
                .iter()
                .find(|c| c.id().as_str() == "a")
                .is_some_and(|c| c.local_status() == LocalStatus::Closed)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Still tracked while reported, even though closed.
        assert_eq!(rig.fleet.batch_get_connects().len(), 2);

        // Service drops `a` from the report: now it is pruned.
        rig.fleet.batch_update_channels(&[open("b", 0)]).await;
        let connects = rig.fleet.batch_get_connects();
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0].id().as_str(), "b");

        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_dial_failure_is_contained() {
        let rig = rig();
        rig.store.fail_gets(true);
        rig.fleet.batch_update_channels(&[open("a", 0)]).await;

        let connects = rig.fleet.batch_get_connects();
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0].local_status(), LocalStatus::Closed);

        // Born closed at version 0; the OPEN report was re-acked.
        let a = rig.fleet.batch_get_channels().pop().unwrap();
        assert_eq!(a, Channel::new("a", 1, ChannelStatus::Close));

        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_affect_others() {
        let rig = rig();
        rig.factory.refuse("bad");
        rig.source.script_live("good");

        rig.fleet
            .batch_update_channels(&[open("bad", 0), open("good", 0)])
            .await;

        let good = rig
            .fleet
            .batch_get_connects()
            .into_iter()
            .find(|c| c.id().as_str() == "good")
            .unwrap();
        assert_eq!(good.local_status(), LocalStatus::Running);

        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_update_status_ignores_untracked() {
        let rig = rig();
        rig.fleet.update_status(&open("ghost", 0));
        assert!(rig.fleet.batch_get_connects().is_empty());
        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_update_status_forwards_to_tracked() {
        let rig = rig();
        rig.fleet.batch_update_channels(&[open("a", 0)]).await;
        rig.fleet
            .update_status(&Channel::new("a", 0, ChannelStatus::Closing));

        let a = rig
            .fleet
            .batch_get_connects()
            .into_iter()
            .find(|c| c.id().as_str() == "a")
            .unwrap();
        assert_ne!(a.local_status(), LocalStatus::Running);

        rig.fleet.close().await;
    }

    #[tokio::test]
    async fn test_close_tears_everything_down() {
        let rig = rig();
        rig.fleet
            .batch_update_channels(&[open("a", 0), open("b", 0)])
            .await;
        let a_probe = rig.factory.probe_for("a");
        let b_probe = rig.factory.probe_for("b");

        rig.fleet.close().await;

        assert!(rig.fleet.batch_get_connects().is_empty());
        assert_eq!(a_probe.shutdown_count(), 1);
        assert_eq!(b_probe.shutdown_count(), 1);

        // Updates after close are ignored.
        rig.fleet.batch_update_channels(&[open("c", 0)]).await;
        assert!(rig.fleet.batch_get_connects().is_empty());
    }
}
