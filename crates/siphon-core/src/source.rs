//! Record source contract.
//!
//! The wire-level RPC client lives outside this crate; the engine consumes
//! it through [`RecordSource`] only. Record payloads are opaque bytes:
//! the engine moves them, it never decodes them.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::error::TunnelError;

/// Distinguished token value marking a fully drained finite channel.
const FINISHED_TOKEN: &str = "finished";

/// Opaque position within a channel's record stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Creates a token from an opaque service-issued string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The initial position of a channel that has never been read.
    #[must_use]
    pub fn start() -> Self {
        Self(String::new())
    }

    /// The end-of-stream sentinel: a finite channel has no more data.
    #[must_use]
    pub fn finished() -> Self {
        Self(FINISHED_TOKEN.to_string())
    }

    /// Returns `true` if this token is the end-of-stream sentinel.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0 == FINISHED_TOKEN
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One record pulled from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Encoded record payload. Decoding is the processor's concern.
    pub payload: Bytes,
}

impl Record {
    /// Creates a record from an opaque payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// The result of one read call: records in fetch order plus the token to
/// resume from after they are processed.
#[derive(Debug, Clone)]
pub struct ReadBatch {
    /// Records in fetch order.
    pub records: Vec<Record>,
    /// Position after the last record in `records`. The end-of-stream
    /// sentinel marks a fully drained finite channel.
    pub next_token: ResumeToken,
}

/// Contract for pulling records out of a channel.
///
/// Implementations wrap the `ReadRecords` RPC. Failures must be classified
/// through [`TunnelError::Service`]'s `retryable` flag: transient outages
/// are retried with backoff, terminal failures close the channel.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Reads the next batch of records for `channel` starting at `token`.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Service`] when the underlying call fails.
    async fn read_records(
        &self,
        channel: &ChannelId,
        token: &ResumeToken,
    ) -> Result<ReadBatch, TunnelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_sentinel() {
        assert!(ResumeToken::finished().is_finished());
        assert!(!ResumeToken::start().is_finished());
        assert!(!ResumeToken::new("abc123").is_finished());
    }

    #[test]
    fn test_token_round_trip() {
        let t = ResumeToken::new("pos-42");
        assert_eq!(t.as_str(), "pos-42");
        assert_eq!(t, ResumeToken::new("pos-42"));
    }
}
