//! Per-channel execution pipeline.
//!
//! Each open channel runs one spawned tokio task driving the
//! read → process → checkpoint loop. The processor is exclusively owned by
//! the task (no `Arc<Mutex>`); read and process steps acquire permits from
//! the shared [`WorkerPools`] but are serialized with respect to each
//! other per channel. At most one batch is read ahead while the previous
//! batch is being processed, bounding memory to two in-flight batches per
//! channel.
//!
//! Cancellation is cooperative: a pending read is abandoned at a
//! cancellation point, an in-flight `process` call is never interrupted,
//! and the processor's `shutdown()` hook runs exactly once after the loop
//! exits. The exit reason is published through a `watch` channel the
//! owning connect polls.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::RetryBackoff;
use crate::channel::ChannelId;
use crate::checkpoint::Checkpointer;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::metrics::ChannelMetrics;
use crate::pool::WorkerPools;
use crate::processor::{ChannelContext, RecordProcessor};
use crate::source::{ReadBatch, Record, RecordSource, ResumeToken};

/// Why a pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    /// The record source returned the end-of-stream sentinel.
    Drained,
    /// Processing, checkpointing, or a non-retryable read failed.
    Failed,
    /// The pipeline was cancelled by its connect.
    Cancelled,
}

/// Everything needed to start a pipeline, assembled at dial time.
///
/// The pipeline does not start until the connect first adopts `OPEN`;
/// until then the launcher just holds the wiring.
pub(crate) struct PipelineLauncher {
    pub ctx: ChannelContext,
    pub source: Arc<dyn RecordSource>,
    pub checkpointer: Arc<Checkpointer>,
    pub processor: Box<dyn RecordProcessor>,
    pub pools: WorkerPools,
    pub config: TunnelConfig,
    pub start_token: ResumeToken,
    pub metrics: Arc<ChannelMetrics>,
}

impl PipelineLauncher {
    /// Spawns the pipeline task and returns its handle.
    pub fn spawn(self) -> PipelineHandle {
        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let pipeline = ChannelPipeline {
            ctx: self.ctx,
            source: self.source,
            checkpointer: self.checkpointer,
            processor: self.processor,
            pools: self.pools,
            config: self.config,
            start_token: self.start_token,
            metrics: self.metrics,
            cancel: cancel.clone(),
        };

        let join = tokio::spawn(async move {
            let exit = pipeline.run().await;
            // Receiver side may already be gone during forced teardown.
            let _ = exit_tx.send(Some(exit));
        });

        PipelineHandle {
            cancel,
            exit: exit_rx,
            join: Some(join),
        }
    }
}

/// Handle held by the owning connect.
pub(crate) struct PipelineHandle {
    cancel: CancellationToken,
    exit: watch::Receiver<Option<PipelineExit>>,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Requests cooperative teardown.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the exit reason once the task has fully stopped
    /// (including the processor `shutdown()` hook).
    pub fn exit_reason(&self) -> Option<PipelineExit> {
        *self.exit.borrow()
    }

    /// Takes the join handle for awaiting teardown. Returns `None` if it
    /// was already taken.
    pub fn take_join(&mut self) -> Option<JoinHandle<()>> {
        self.join.take()
    }
}

/// The per-channel task body.
struct ChannelPipeline {
    ctx: ChannelContext,
    source: Arc<dyn RecordSource>,
    checkpointer: Arc<Checkpointer>,
    processor: Box<dyn RecordProcessor>,
    pools: WorkerPools,
    config: TunnelConfig,
    start_token: ResumeToken,
    metrics: Arc<ChannelMetrics>,
    cancel: CancellationToken,
}

/// Outcome of one (retried) read step.
enum ReadOutcome {
    Batch(ReadBatch),
    Cancelled,
    Failed,
}

impl ChannelPipeline {
    async fn run(mut self) -> PipelineExit {
        info!(
            channel = %self.ctx.channel_id,
            token = %self.start_token,
            "channel pipeline started"
        );

        let exit = self.drive().await;

        // Exactly once, for every pipeline that ever started.
        self.processor.shutdown().await;

        info!(channel = %self.ctx.channel_id, exit = ?exit, "channel pipeline stopped");
        exit
    }

    /// The read → process → checkpoint loop.
    async fn drive(&mut self) -> PipelineExit {
        let mut token = self.start_token.clone();
        if token.is_finished() {
            // Restored checkpoint was already at end-of-stream.
            return PipelineExit::Drained;
        }

        let mut pending: Option<ReadBatch> = None;

        loop {
            if self.cancel.is_cancelled() {
                return PipelineExit::Cancelled;
            }

            let batch = match pending.take() {
                Some(batch) => batch,
                None => match read_with_retry(
                    self.source.as_ref(),
                    &self.pools,
                    &self.config,
                    &self.cancel,
                    &self.metrics,
                    &self.ctx.channel_id,
                    &token,
                )
                .await
                {
                    ReadOutcome::Batch(batch) => batch,
                    ReadOutcome::Cancelled => return PipelineExit::Cancelled,
                    ReadOutcome::Failed => return PipelineExit::Failed,
                },
            };

            let next_token = batch.next_token.clone();
            let finished = next_token.is_finished();

            if batch.records.is_empty() && !finished {
                // Live channel with no new data: move the cursor and idle
                // instead of hot-looping against the source.
                token = next_token;
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return PipelineExit::Cancelled,
                    () = tokio::time::sleep(self.config.idle_poll_interval) => {}
                }
                continue;
            }

            if finished {
                // Final batch of a finite channel: process what came with
                // it, persist the sentinel so recovery sees a drained
                // channel, and stop.
                if let Err(exit) = self.process_batch(batch.records).await {
                    return exit;
                }
                if self.persist(&next_token).await.is_err() {
                    return PipelineExit::Failed;
                }
                return PipelineExit::Drained;
            }

            // Overlap: process the current batch while reading one batch
            // ahead. The read is cancellable; the process call is not.
            let read_ahead = read_with_retry(
                self.source.as_ref(),
                &self.pools,
                &self.config,
                &self.cancel,
                &self.metrics,
                &self.ctx.channel_id,
                &next_token,
            );
            let process = process_guarded(
                &self.pools,
                &self.cancel,
                self.processor.as_mut(),
                batch.records,
            );
            let (ahead, processed) = tokio::join!(read_ahead, process);

            match processed {
                Ok(()) => {}
                Err(TunnelError::PoolClosed) => return PipelineExit::Cancelled,
                Err(e) => {
                    self.metrics.record_processing_error();
                    warn!(
                        channel = %self.ctx.channel_id,
                        error = %e,
                        "processing failed, closing channel"
                    );
                    return PipelineExit::Failed;
                }
            }

            if self.persist(&next_token).await.is_err() {
                return PipelineExit::Failed;
            }
            token = next_token;

            pending = match ahead {
                ReadOutcome::Batch(batch) => Some(batch),
                // Cancellation is observed at the top of the loop.
                ReadOutcome::Cancelled => None,
                ReadOutcome::Failed => return PipelineExit::Failed,
            };
        }
    }

    /// Processes the final batch of a drained channel.
    async fn process_batch(&mut self, records: Vec<Record>) -> Result<(), PipelineExit> {
        match process_guarded(&self.pools, &self.cancel, self.processor.as_mut(), records).await {
            Ok(()) => Ok(()),
            Err(TunnelError::PoolClosed) => Err(PipelineExit::Cancelled),
            Err(e) => {
                self.metrics.record_processing_error();
                warn!(
                    channel = %self.ctx.channel_id,
                    error = %e,
                    "processing failed, closing channel"
                );
                Err(PipelineExit::Failed)
            }
        }
    }

    /// Persists `token` through the shared checkpointer.
    async fn persist(&mut self, token: &ResumeToken) -> Result<(), TunnelError> {
        match self.checkpointer.advance(token).await {
            Ok(()) => {
                self.metrics.record_checkpoint();
                Ok(())
            }
            Err(e) => {
                warn!(
                    channel = %self.ctx.channel_id,
                    error = %e,
                    "checkpoint write failed, closing channel"
                );
                Err(e)
            }
        }
    }
}

/// Runs the processing callback under a process-pool permit.
///
/// Empty batches are skipped. The callback itself is never raced against
/// cancellation; only the permit acquisition is.
async fn process_guarded(
    pools: &WorkerPools,
    cancel: &CancellationToken,
    processor: &mut dyn RecordProcessor,
    records: Vec<Record>,
) -> Result<(), TunnelError> {
    if records.is_empty() {
        return Ok(());
    }
    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(TunnelError::PoolClosed),
        permit = pools.acquire_process() => permit?,
    };
    processor.process(records).await
}

/// One read step: acquires a read permit, issues the call, and retries
/// transient failures with backoff until cancelled or out of budget.
async fn read_with_retry(
    source: &dyn RecordSource,
    pools: &WorkerPools,
    config: &TunnelConfig,
    cancel: &CancellationToken,
    metrics: &ChannelMetrics,
    channel: &ChannelId,
    token: &ResumeToken,
) -> ReadOutcome {
    let mut backoff = RetryBackoff::new(config.retry.clone());

    loop {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            permit = pools.acquire_read() => match permit {
                Ok(permit) => permit,
                Err(_) => return ReadOutcome::Cancelled,
            },
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            result = source.read_records(channel, token) => result,
        };
        drop(permit);

        match result {
            Ok(batch) => {
                #[allow(clippy::cast_possible_truncation)]
                metrics.record_read(batch.records.len() as u64);
                return ReadOutcome::Batch(batch);
            }
            Err(e) if e.is_retryable() => {
                metrics.record_read_retry();
                let Some(delay) = backoff.next_delay() else {
                    warn!(channel = %channel, error = %e, "read retry budget exhausted");
                    return ReadOutcome::Failed;
                };
                debug!(
                    channel = %channel,
                    error = %e,
                    attempt = backoff.attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient read failure, backing off"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return ReadOutcome::Cancelled,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "read failed, closing channel");
                return ReadOutcome::Failed;
            }
        }
    }
}
