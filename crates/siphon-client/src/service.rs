//! The narrow contract to the tunnel service's RPC layer.

use async_trait::async_trait;
use siphon_core::{Channel, TunnelError};

/// Client-lifecycle and heartbeat calls against the tunnel service.
///
/// Implementations wrap the wire-level `ConnectTunnel` / `Heartbeat` /
/// `ShutdownTunnel` RPCs; the worker only ever sees this trait.
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// Registers `client_name` as a consumer of `tunnel_id` and returns
    /// the service-assigned client id.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Service`] when the call fails.
    async fn connect_tunnel(
        &self,
        tunnel_id: &str,
        client_name: &str,
    ) -> Result<String, TunnelError>;

    /// Reports the client's current channel snapshots and receives the
    /// authoritative channel list back.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Service`] when the call fails; the worker
    /// retries on the next tick.
    async fn heartbeat(
        &self,
        tunnel_id: &str,
        client_id: &str,
        channels: Vec<Channel>,
    ) -> Result<Vec<Channel>, TunnelError>;

    /// Deregisters the client from the tunnel.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Service`] when the call fails.
    async fn shutdown_tunnel(&self, tunnel_id: &str, client_id: &str) -> Result<(), TunnelError>;
}
