//! # Siphon Core
//!
//! Consumer-side coordination engine for a managed tunnel streaming
//! service. The service hands a dynamic set of channels (shard-like
//! partitions, full-data or incremental) to a client process; this crate
//! negotiates per-channel lifecycle state against periodic heartbeats
//! while pulling and dispatching records for every owned channel.
//!
//! # Architecture
//!
//! ```text
//! heartbeat list ──► TunnelStateMachine ──► ChannelDialer
//!                         │ id → connect          │ checkpoint fetch
//!                         ▼                       ▼
//!                    ChannelConnect ◄──── ChannelPipeline (task)
//!                    lease state machine   read → process → checkpoint
//!                                          (shared WorkerPools)
//! ```
//!
//! The wire-level RPC client, record encodings, and the write path live
//! elsewhere; they are consumed through the [`RecordSource`],
//! [`CheckpointStore`], and [`ProcessorFactory`] contracts.
//!
//! [`RecordSource`]: source::RecordSource
//! [`CheckpointStore`]: checkpoint::CheckpointStore
//! [`ProcessorFactory`]: processor::ProcessorFactory

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod backoff;
pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod connect;
pub mod dialer;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod processor;
pub mod source;
pub mod state_machine;
pub mod testing;

pub use channel::{Channel, ChannelId, ChannelStatus, LocalStatus};
pub use checkpoint::{CheckpointPosition, CheckpointStore, Checkpointer};
pub use config::{RetryConfig, TunnelConfig};
pub use connect::ChannelConnect;
pub use dialer::ChannelDialer;
pub use error::TunnelError;
pub use metrics::{ChannelMetrics, ChannelMetricsSnapshot};
pub use pipeline::PipelineExit;
pub use pool::WorkerPools;
pub use processor::{ChannelContext, ProcessorFactory, RecordProcessor};
pub use source::{ReadBatch, Record, RecordSource, ResumeToken};
pub use state_machine::TunnelStateMachine;
