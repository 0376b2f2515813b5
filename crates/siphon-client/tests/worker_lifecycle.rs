//! End-to-end worker lifecycle tests against a scripted service.
//!
//! Validates the full consumer path:
//! 1. The worker registers and heartbeats against the mock service
//! 2. Reported channels are dialed and their pipelines consume records
//! 3. Lifecycle transitions (drain, self-termination, dial failure) are
//!    acknowledged back to the service with bumped versions
//! 4. Shutdown tears every channel down exactly once

use std::sync::Arc;
use std::time::Duration;

use siphon_client::testing::MockTunnelService;
use siphon_client::{ClientError, TunnelWorker, TunnelWorkerBuilder, WorkerConfig};
use siphon_core::testing::{MockCheckpointStore, MockProcessorFactory, MockRecordSource};
use siphon_core::{
    Channel, ChannelStatus, CheckpointStore, LocalStatus, ProcessorFactory, RecordSource,
    RetryConfig, TunnelConfig,
};

struct Rig {
    service: Arc<MockTunnelService>,
    source: Arc<MockRecordSource>,
    store: Arc<MockCheckpointStore>,
    factory: Arc<MockProcessorFactory>,
}

impl Rig {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        Self {
            service: Arc::new(MockTunnelService::new()),
            source: Arc::new(MockRecordSource::new()),
            store: Arc::new(MockCheckpointStore::new()),
            factory: Arc::new(MockProcessorFactory::new()),
        }
    }

    async fn worker(&self) -> TunnelWorker {
        let config = WorkerConfig {
            heartbeat_interval: Duration::from_millis(5),
            max_heartbeat_failures: 5,
            tunnel: TunnelConfig {
                retry: RetryConfig {
                    initial_delay: Duration::from_millis(1),
                    jitter: false,
                    ..RetryConfig::default()
                },
                idle_poll_interval: Duration::from_millis(1),
                ..TunnelConfig::default()
            },
        };
        TunnelWorkerBuilder::new("tunnel-1")
            .client_name("test-client")
            .config(config)
            .service(Arc::clone(&self.service) as Arc<dyn siphon_client::TunnelService>)
            .record_source(Arc::clone(&self.source) as Arc<dyn RecordSource>)
            .checkpoint_store(Arc::clone(&self.store) as Arc<dyn CheckpointStore>)
            .processor_factory(Arc::clone(&self.factory) as Arc<dyn ProcessorFactory>)
            .build()
            .await
            .expect("worker build")
    }
}

fn open(id: &str, version: u64) -> Channel {
    Channel::new(id, version, ChannelStatus::Open)
}

/// Polls `predicate` until it holds or a generous deadline passes.
async fn wait_for(what: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_worker_consumes_reported_channels() {
    let rig = Rig::new();
    rig.source.script_finite("a", 3, 4);
    rig.source.script_finite("b", 2, 2);
    rig.service.push_channels(vec![open("a", 0), open("b", 0)]);

    let worker = rig.worker().await;
    let shutdown = worker.shutdown_token();
    let handle = tokio::spawn(worker.run());

    let a = rig.factory.probe_for("a");
    let b = rig.factory.probe_for("b");
    wait_for("all records processed", || {
        a.records() == 12 && b.records() == 4
    })
    .await;

    // Both finite channels self-terminate and get acknowledged with a
    // version bump on a later heartbeat.
    wait_for("terminated channels reported", || {
        rig.service.reported().last().is_some_and(|channels| {
            channels.len() == 2
                && channels
                    .iter()
                    .all(|c| c.status == ChannelStatus::Terminated && c.version == 1)
        })
    })
    .await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(a.shutdown_count(), 1);
    assert_eq!(b.shutdown_count(), 1);
    assert_eq!(rig.service.connect_count(), 1);
    assert_eq!(rig.service.shutdown_count(), 1);
}

#[tokio::test]
async fn test_closing_channel_drops_out_of_four() {
    let rig = Rig::new();
    let all_open = vec![open("a", 0), open("b", 0), open("c", 0), open("d", 0)];
    rig.service.push_channels(all_open);
    // From the second heartbeat on, the service wants `a` drained.
    rig.service.push_channels(vec![
        Channel::new("a", 0, ChannelStatus::Closing),
        open("b", 0),
        open("c", 0),
        open("d", 0),
    ]);

    let worker = rig.worker().await;
    let fleet = worker.state_machine();
    let shutdown = worker.shutdown_token();
    let handle = tokio::spawn(worker.run());

    wait_for("channel a drained", || {
        fleet
            .batch_get_connects()
            .iter()
            .find(|c| c.id().as_str() == "a")
            .is_some_and(|c| c.local_status() == LocalStatus::Closed)
    })
    .await;

    // All four are still reported, so all four stay tracked; only the
    // drained one left the running set.
    assert_eq!(fleet.batch_get_connects().len(), 4);
    let running = fleet
        .batch_get_connects()
        .iter()
        .filter(|c| c.local_status() == LocalStatus::Running)
        .count();
    assert_eq!(running, 3);

    let a = fleet
        .batch_get_channels()
        .into_iter()
        .find(|c| c.id.as_str() == "a")
        .unwrap();
    assert_eq!(a, Channel::new("a", 1, ChannelStatus::Close));

    // The close acknowledgement reaches the service on a later beat.
    wait_for("close reported", || {
        rig.service.reported().last().is_some_and(|channels| {
            channels
                .iter()
                .any(|c| c.id.as_str() == "a" && c.status == ChannelStatus::Close && c.version == 1)
        })
    })
    .await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_heartbeat_failure_budget_stops_worker() {
    let rig = Rig::new();
    rig.service.push_error("service unavailable");

    let config = WorkerConfig {
        heartbeat_interval: Duration::from_millis(1),
        max_heartbeat_failures: 3,
        tunnel: TunnelConfig::default(),
    };
    let worker = TunnelWorkerBuilder::new("tunnel-1")
        .config(config)
        .service(Arc::clone(&rig.service) as Arc<dyn siphon_client::TunnelService>)
        .record_source(Arc::clone(&rig.source) as Arc<dyn RecordSource>)
        .checkpoint_store(Arc::clone(&rig.store) as Arc<dyn CheckpointStore>)
        .processor_factory(Arc::clone(&rig.factory) as Arc<dyn ProcessorFactory>)
        .build()
        .await
        .unwrap();

    let result = worker.run().await;
    assert!(matches!(
        result,
        Err(ClientError::HeartbeatFailed { attempts: 3 })
    ));
    // The worker still deregisters on the failure path.
    assert_eq!(rig.service.shutdown_count(), 1);
}

#[tokio::test]
async fn test_dial_failure_is_reported_as_close() {
    let rig = Rig::new();
    rig.store.fail_gets(true);
    rig.service.push_channels(vec![open("a", 0)]);

    let worker = rig.worker().await;
    let shutdown = worker.shutdown_token();
    let handle = tokio::spawn(worker.run());

    wait_for("born-closed channel acknowledged", || {
        rig.service.reported().last().is_some_and(|channels| {
            channels
                .iter()
                .any(|c| c.id.as_str() == "a" && c.status == ChannelStatus::Close && c.version == 1)
        })
    })
    .await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_live_channels_once() {
    let rig = Rig::new();
    rig.source.script_live("a");
    rig.source.script_live("b");
    rig.service.push_channels(vec![open("a", 0), open("b", 0)]);

    let worker = rig.worker().await;
    let fleet = worker.state_machine();
    let shutdown = worker.shutdown_token();
    let handle = tokio::spawn(worker.run());

    wait_for("channels running", || {
        fleet
            .batch_get_connects()
            .iter()
            .filter(|c| c.local_status() == LocalStatus::Running)
            .count()
            == 2
    })
    .await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(rig.factory.probe_for("a").shutdown_count(), 1);
    assert_eq!(rig.factory.probe_for("b").shutdown_count(), 1);
    assert_eq!(rig.service.shutdown_count(), 1);
    assert!(fleet.batch_get_connects().is_empty());
}

#[tokio::test]
async fn test_builder_rejects_missing_collaborators() {
    let rig = Rig::new();
    let result = TunnelWorkerBuilder::new("tunnel-1")
        .service(Arc::clone(&rig.service) as Arc<dyn siphon_client::TunnelService>)
        .build()
        .await;
    assert!(matches!(result, Err(ClientError::Config(_))));
}
