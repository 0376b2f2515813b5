//! User processing callback contracts.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::ChannelId;
use crate::checkpoint::Checkpointer;
use crate::error::TunnelError;
use crate::source::Record;

/// Identity of the channel a processor is bound to.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    /// Tunnel this channel belongs to.
    pub tunnel_id: String,
    /// Client consuming the tunnel.
    pub client_id: String,
    /// The channel itself.
    pub channel_id: ChannelId,
}

/// User processing logic bound to exactly one channel.
///
/// The engine serializes calls per channel: `process` is never invoked
/// concurrently for the same channel, and records arrive in fetch order.
/// `shutdown` runs exactly once, after the last `process` call returns,
/// for every processor whose pipeline ever started.
#[async_trait]
pub trait RecordProcessor: Send {
    /// Handles one batch of records.
    ///
    /// # Errors
    ///
    /// Any error is unrecoverable for this channel: the pipeline stops and
    /// the channel self-closes with outcome `Close`. Other channels are
    /// unaffected.
    async fn process(&mut self, records: Vec<Record>) -> Result<(), TunnelError>;

    /// Releases processor-held resources. Called exactly once.
    async fn shutdown(&mut self);
}

/// Factory producing one [`RecordProcessor`] per dialed channel.
#[async_trait]
pub trait ProcessorFactory: Send + Sync {
    /// Builds the processor for `ctx`.
    ///
    /// The `checkpointer` is the same instance the pipeline checkpoints
    /// through, so user-initiated and engine-initiated writes share one
    /// sequence counter.
    ///
    /// # Errors
    ///
    /// Refusing the channel (or failing to construct) yields a born-closed
    /// connect; the fleet reports it back as `CLOSE` without retrying.
    async fn create(
        &self,
        ctx: &ChannelContext,
        checkpointer: Arc<Checkpointer>,
    ) -> Result<Box<dyn RecordProcessor>, TunnelError>;
}
