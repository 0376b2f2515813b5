//! Channel lease snapshots.
//!
//! A [`Channel`] is an immutable `{id, version, status}` triple describing
//! one channel's negotiated lifecycle state. Snapshots are produced by the
//! service (heartbeat responses) or by a connect acknowledging a completed
//! local transition; they are always replaced, never mutated in place.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one channel within a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a channel id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Negotiated lifecycle status of a channel lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    /// Held by the service; not yet assigned to any client.
    Wait,
    /// Assigned to this client and eligible for reading.
    Open,
    /// The service asked this client to drain and release the channel.
    Closing,
    /// The channel is closed from this client's perspective.
    Close,
    /// The channel's data has been fully consumed (finite channels only).
    Terminated,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Wait => "WAIT",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Close => "CLOSE",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// One channel's negotiated lease state at a point in time.
///
/// `version` is an optimistic-concurrency token: the service bumps it when
/// it hands the channel out, and the client bumps it to acknowledge a
/// locally completed transition. A connect never regresses the version it
/// stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier.
    pub id: ChannelId,
    /// Lease version.
    pub version: u64,
    /// Negotiated status.
    pub status: ChannelStatus,
}

impl Channel {
    /// Creates a channel snapshot.
    pub fn new(id: impl Into<ChannelId>, version: u64, status: ChannelStatus) -> Self {
        Self {
            id: id.into(),
            version,
            status,
        }
    }
}

/// Local execution state of a channel connect, distinct from the
/// negotiated [`ChannelStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    /// The pipeline is (or may be) executing.
    Running,
    /// A graceful drain is in progress.
    Closing,
    /// Terminal: the connect will never execute again.
    Closed,
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
