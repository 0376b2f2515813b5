//! Durable checkpoint contract and the per-channel checkpointer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ChannelId;
use crate::error::TunnelError;
use crate::source::ResumeToken;

/// A durable channel position: the resume token plus the client-side
/// sequence number under which it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPosition {
    /// Resume token to restart reading from.
    pub token: ResumeToken,
    /// Monotonically increasing write counter for this channel.
    pub sequence_number: u64,
}

/// Contract for the external checkpoint store.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetches the last persisted position for `channel`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Checkpoint`] when the store is unreachable.
    async fn get_checkpoint(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<CheckpointPosition>, TunnelError>;

    /// Persists `position` for `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Checkpoint`] when the write fails.
    async fn checkpoint(
        &self,
        channel: &ChannelId,
        position: &CheckpointPosition,
    ) -> Result<(), TunnelError>;
}

/// Per-channel checkpoint writer with a monotonic sequence counter.
///
/// Exclusively owned by one channel connect; also handed to the user
/// processor so it can persist progress mid-batch if it wants to.
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    channel: ChannelId,
    sequence: AtomicU64,
}

impl Checkpointer {
    /// Creates a checkpointer resuming from `last_sequence`.
    pub fn new(store: Arc<dyn CheckpointStore>, channel: ChannelId, last_sequence: u64) -> Self {
        Self {
            store,
            channel,
            sequence: AtomicU64::new(last_sequence),
        }
    }

    /// The channel this checkpointer writes for.
    #[must_use]
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// The sequence number of the last write (or the restored one).
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Persists `token` under the next sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Checkpoint`] when the store write fails. The
    /// sequence number is consumed either way; the store keys by channel,
    /// so a later successful write supersedes the gap.
    pub async fn advance(&self, token: &ResumeToken) -> Result<(), TunnelError> {
        let sequence_number = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let position = CheckpointPosition {
            token: token.clone(),
            sequence_number,
        };
        self.store.checkpoint(&self.channel, &position).await?;
        debug!(
            channel = %self.channel,
            sequence = sequence_number,
            "checkpoint persisted"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Checkpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpointer")
            .field("channel", &self.channel)
            .field("sequence", &self.last_sequence())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCheckpointStore;

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let store = Arc::new(MockCheckpointStore::new());
        let cp = Checkpointer::new(store.clone(), ChannelId::new("ch"), 7);

        cp.advance(&ResumeToken::new("t1")).await.unwrap();
        cp.advance(&ResumeToken::new("t2")).await.unwrap();

        let pos = store
            .get_checkpoint(&ChannelId::new("ch"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.sequence_number, 9);
        assert_eq!(pos.token, ResumeToken::new("t2"));
        assert_eq!(cp.last_sequence(), 9);
    }
}
