//! Scriptable tunnel service for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use siphon_core::{Channel, TunnelError};

use crate::service::TunnelService;

/// One scripted heartbeat response.
#[derive(Debug, Clone)]
enum Beat {
    Channels(Vec<Channel>),
    Error(String),
}

/// In-memory [`TunnelService`] with scripted heartbeat responses.
///
/// Responses are consumed in FIFO order; the last one is sticky and
/// repeats for every subsequent heartbeat, which mirrors a service whose
/// assignment has stabilized.
#[derive(Default)]
pub struct MockTunnelService {
    beats: Mutex<VecDeque<Beat>>,
    reported: Mutex<Vec<Vec<Channel>>>,
    connects: AtomicU64,
    shutdowns: AtomicU64,
}

impl MockTunnelService {
    /// Creates a service with no scripted responses: every heartbeat
    /// returns an empty channel list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a heartbeat response.
    pub fn push_channels(&self, channels: Vec<Channel>) {
        self.beats.lock().push_back(Beat::Channels(channels));
    }

    /// Queues a heartbeat failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.beats.lock().push_back(Beat::Error(message.into()));
    }

    /// Channel snapshots the client reported, one entry per heartbeat.
    #[must_use]
    pub fn reported(&self) -> Vec<Vec<Channel>> {
        self.reported.lock().clone()
    }

    /// Number of `connect_tunnel` calls.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of `shutdown_tunnel` calls.
    #[must_use]
    pub fn shutdown_count(&self) -> u64 {
        self.shutdowns.load(Ordering::Relaxed)
    }

    fn next_beat(&self) -> Beat {
        let mut beats = self.beats.lock();
        match beats.len() {
            0 => Beat::Channels(Vec::new()),
            1 => beats.front().cloned().unwrap_or(Beat::Channels(Vec::new())),
            _ => beats.pop_front().unwrap_or(Beat::Channels(Vec::new())),
        }
    }
}

#[async_trait]
impl TunnelService for MockTunnelService {
    async fn connect_tunnel(
        &self,
        _tunnel_id: &str,
        client_name: &str,
    ) -> Result<String, TunnelError> {
        let n = self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{client_name}-{n}"))
    }

    async fn heartbeat(
        &self,
        _tunnel_id: &str,
        _client_id: &str,
        channels: Vec<Channel>,
    ) -> Result<Vec<Channel>, TunnelError> {
        self.reported.lock().push(channels);
        match self.next_beat() {
            Beat::Channels(channels) => Ok(channels),
            Beat::Error(message) => Err(TunnelError::transient(message)),
        }
    }

    async fn shutdown_tunnel(&self, _tunnel_id: &str, _client_id: &str) -> Result<(), TunnelError> {
        self.shutdowns.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
