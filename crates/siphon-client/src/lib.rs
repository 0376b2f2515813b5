//! # Siphon Client
//!
//! Heartbeat-driven consumer facade over [`siphon_core`]. The
//! [`TunnelWorker`] registers a client with the tunnel service, then on a
//! fixed interval exchanges local channel snapshots for the authoritative
//! channel list and feeds it into the engine's
//! [`TunnelStateMachine`](siphon_core::TunnelStateMachine).
//!
//! The wire-level RPC client is supplied by the embedding application
//! through the [`TunnelService`] contract.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod builder;
pub mod config;
pub mod error;
pub mod service;
pub mod testing;
pub mod worker;

pub use builder::TunnelWorkerBuilder;
pub use config::WorkerConfig;
pub use error::ClientError;
pub use service::TunnelService;
pub use worker::TunnelWorker;
