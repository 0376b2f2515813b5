//! Channel dialing.
//!
//! The dialer turns a channel id plus a fallback resume token into a
//! [`ChannelConnect`] wired to the shared worker pools and the durable
//! checkpoint store. Dial-time failures (checkpoint fetch, processor
//! creation) produce an already-closed connect, so the fleet never
//! special-cases them: a born-closed channel is simply reported back as
//! `CLOSE` on the next heartbeat.

use std::sync::Arc;

use tracing::{info, warn};

use crate::channel::ChannelId;
use crate::checkpoint::{CheckpointStore, Checkpointer};
use crate::config::TunnelConfig;
use crate::connect::ChannelConnect;
use crate::metrics::ChannelMetrics;
use crate::pipeline::PipelineLauncher;
use crate::pool::WorkerPools;
use crate::processor::{ChannelContext, ProcessorFactory};
use crate::source::{RecordSource, ResumeToken};

/// Factory for [`ChannelConnect`]s bound to one tunnel client.
pub struct ChannelDialer {
    tunnel_id: String,
    client_id: String,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn CheckpointStore>,
    factory: Arc<dyn ProcessorFactory>,
    pools: WorkerPools,
    config: TunnelConfig,
}

impl ChannelDialer {
    /// Creates a dialer sharing `pools` across every dialed channel.
    pub fn new(
        tunnel_id: impl Into<String>,
        client_id: impl Into<String>,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn CheckpointStore>,
        factory: Arc<dyn ProcessorFactory>,
        pools: WorkerPools,
        config: TunnelConfig,
    ) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            client_id: client_id.into(),
            source,
            store,
            factory,
            pools,
            config,
        }
    }

    /// Constructs the connect for `channel_id`.
    ///
    /// The durable checkpoint wins over `resume_token` when both exist.
    /// Failure to fetch it, or a processor factory refusal, yields a
    /// born-closed connect rather than an error.
    pub async fn dial(&self, channel_id: ChannelId, resume_token: ResumeToken) -> ChannelConnect {
        let (start_token, last_sequence) = match self.store.get_checkpoint(&channel_id).await {
            Ok(Some(position)) => (position.token, position.sequence_number),
            Ok(None) => (resume_token, 0),
            Err(e) => {
                warn!(
                    channel = %channel_id,
                    error = %e,
                    "checkpoint fetch failed, channel born closed"
                );
                return ChannelConnect::born_closed(channel_id);
            }
        };

        let checkpointer = Arc::new(Checkpointer::new(
            Arc::clone(&self.store),
            channel_id.clone(),
            last_sequence,
        ));

        let ctx = ChannelContext {
            tunnel_id: self.tunnel_id.clone(),
            client_id: self.client_id.clone(),
            channel_id: channel_id.clone(),
        };

        let processor = match self.factory.create(&ctx, Arc::clone(&checkpointer)).await {
            Ok(processor) => processor,
            Err(e) => {
                warn!(
                    channel = %channel_id,
                    error = %e,
                    "processor creation failed, channel born closed"
                );
                return ChannelConnect::born_closed(channel_id);
            }
        };

        info!(
            channel = %channel_id,
            token = %start_token,
            sequence = last_sequence,
            "channel dialed"
        );

        let metrics = Arc::new(ChannelMetrics::default());
        let launcher = PipelineLauncher {
            ctx,
            source: Arc::clone(&self.source),
            checkpointer,
            processor,
            pools: self.pools.clone(),
            config: self.config.clone(),
            start_token,
            metrics: Arc::clone(&metrics),
        };

        ChannelConnect::new(channel_id, launcher, metrics)
    }
}

impl std::fmt::Debug for ChannelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDialer")
            .field("tunnel_id", &self.tunnel_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelStatus, LocalStatus};
    use crate::testing::{MockCheckpointStore, MockProcessorFactory, MockRecordSource};

    struct Rig {
        source: Arc<MockRecordSource>,
        store: Arc<MockCheckpointStore>,
        factory: Arc<MockProcessorFactory>,
        dialer: ChannelDialer,
    }

    fn rig() -> Rig {
        let source = Arc::new(MockRecordSource::new());
        let store = Arc::new(MockCheckpointStore::new());
        let factory = Arc::new(MockProcessorFactory::new());
        let dialer = ChannelDialer::new(
            "tunnel",
            "client",
            Arc::clone(&source) as Arc<dyn RecordSource>,
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            Arc::clone(&factory) as Arc<dyn ProcessorFactory>,
            WorkerPools::new(2, 2),
            TunnelConfig::default(),
        );
        Rig {
            source,
            store,
            factory,
            dialer,
        }
    }

    #[tokio::test]
    async fn test_dial_success_is_fresh() {
        let rig = rig();
        let connect = rig
            .dialer
            .dial(ChannelId::new("ch"), ResumeToken::start())
            .await;
        assert_eq!(connect.current_channel(), None);
        assert_eq!(connect.local_status(), LocalStatus::Running);
    }

    #[tokio::test]
    async fn test_dial_resumes_from_stored_checkpoint() {
        let rig = rig();
        rig.store.seed("ch", ResumeToken::new("stored-pos"), 12);
        // One empty live read proves the pipeline starts from the stored
        // token; the mock echoes the cursor back.
        rig.source.script_live("ch");

        let connect = rig
            .dialer
            .dial(ChannelId::new("ch"), ResumeToken::new("fallback"))
            .await;
        connect.notify_status(&Channel::new("ch", 0, ChannelStatus::Open));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(rig.source.reads("ch") > 0);
        connect.close().await;
    }

    #[tokio::test]
    async fn test_checkpoint_fetch_failure_births_closed() {
        let rig = rig();
        rig.store.fail_gets(true);

        let connect = rig
            .dialer
            .dial(ChannelId::new("ch"), ResumeToken::start())
            .await;
        assert_eq!(connect.local_status(), LocalStatus::Closed);
        assert_eq!(
            connect.current_channel(),
            Some(Channel::new("ch", 0, ChannelStatus::Close))
        );
    }

    #[tokio::test]
    async fn test_factory_refusal_births_closed() {
        let rig = rig();
        rig.factory.refuse("ch");

        let connect = rig
            .dialer
            .dial(ChannelId::new("ch"), ResumeToken::start())
            .await;
        assert_eq!(connect.local_status(), LocalStatus::Closed);
        assert_eq!(
            connect.current_channel(),
            Some(Channel::new("ch", 0, ChannelStatus::Close))
        );
    }
}
