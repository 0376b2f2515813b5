//! In-memory test doubles for the engine's external collaborators.
//!
//! Used by this crate's unit tests and by downstream integration tests.
//! All mocks are cheaply cloneable / `Arc`-shareable and fully scriptable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::channel::ChannelId;
use crate::checkpoint::{CheckpointPosition, CheckpointStore, Checkpointer};
use crate::error::TunnelError;
use crate::processor::{ChannelContext, ProcessorFactory, RecordProcessor};
use crate::source::{ReadBatch, Record, RecordSource, ResumeToken};

/// Scripted per-channel read results.
#[derive(Default)]
struct ChannelScript {
    entries: VecDeque<Result<ReadBatch, TunnelError>>,
    reads: u64,
}

/// Scriptable [`RecordSource`].
///
/// Reads consume scripted entries in FIFO order. Once a channel's script
/// is empty it behaves like a live channel with no new data: an empty
/// batch with the cursor unchanged.
#[derive(Default)]
pub struct MockRecordSource {
    scripts: Mutex<HashMap<String, ChannelScript>>,
}

impl MockRecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one successful batch for `channel`.
    pub fn script_batch(&self, channel: &str, records: Vec<Record>, next_token: ResumeToken) {
        self.scripts
            .lock()
            .entry(channel.to_string())
            .or_default()
            .entries
            .push_back(Ok(ReadBatch {
                records,
                next_token,
            }));
    }

    /// Queues one read error for `channel`.
    pub fn script_error(&self, channel: &str, error: TunnelError) {
        self.scripts
            .lock()
            .entry(channel.to_string())
            .or_default()
            .entries
            .push_back(Err(error));
    }

    /// Scripts a finite channel: `batches` batches of `records_each`
    /// records, the last one carrying the end-of-stream sentinel.
    ///
    /// Payloads sort lexicographically in fetch order, which lets tests
    /// assert ordering without extra bookkeeping.
    pub fn script_finite(&self, channel: &str, batches: usize, records_each: usize) {
        for batch in 0..batches {
            let records = (0..records_each)
                .map(|rec| Record::new(format!("{channel}-{batch:04}-{rec:04}")))
                .collect();
            let next_token = if batch + 1 == batches {
                ResumeToken::finished()
            } else {
                ResumeToken::new(format!("{channel}-token-{}", batch + 1))
            };
            self.script_batch(channel, records, next_token);
        }
    }

    /// Registers `channel` as a live channel with no scripted data: every
    /// read returns an empty batch with the cursor unchanged.
    pub fn script_live(&self, channel: &str) {
        self.scripts.lock().entry(channel.to_string()).or_default();
    }

    /// Number of read calls issued for `channel`.
    #[must_use]
    pub fn reads(&self, channel: &str) -> u64 {
        self.scripts
            .lock()
            .get(channel)
            .map_or(0, |script| script.reads)
    }
}

#[async_trait]
impl RecordSource for MockRecordSource {
    async fn read_records(
        &self,
        channel: &ChannelId,
        token: &ResumeToken,
    ) -> Result<ReadBatch, TunnelError> {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(channel.as_str().to_string()).or_default();
        script.reads += 1;
        match script.entries.pop_front() {
            Some(entry) => entry,
            None => Ok(ReadBatch {
                records: Vec::new(),
                next_token: token.clone(),
            }),
        }
    }
}

/// In-memory [`CheckpointStore`] with togglable failure modes.
#[derive(Default)]
pub struct MockCheckpointStore {
    positions: Mutex<HashMap<ChannelId, CheckpointPosition>>,
    history: Mutex<Vec<(ChannelId, CheckpointPosition)>>,
    fail_gets: std::sync::atomic::AtomicBool,
    fail_puts: std::sync::atomic::AtomicBool,
}

impl MockCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stored position for `channel`.
    pub fn seed(&self, channel: &str, token: ResumeToken, sequence_number: u64) {
        self.positions.lock().insert(
            ChannelId::new(channel),
            CheckpointPosition {
                token,
                sequence_number,
            },
        );
    }

    /// Makes every `get_checkpoint` call fail (dial-failure scenarios).
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::Relaxed);
    }

    /// Makes every `checkpoint` call fail.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }

    /// Every write in order, across all channels.
    #[must_use]
    pub fn history(&self) -> Vec<(ChannelId, CheckpointPosition)> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for MockCheckpointStore {
    async fn get_checkpoint(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<CheckpointPosition>, TunnelError> {
        if self.fail_gets.load(Ordering::Relaxed) {
            return Err(TunnelError::Checkpoint("mock get failure".to_string()));
        }
        Ok(self.positions.lock().get(channel).cloned())
    }

    async fn checkpoint(
        &self,
        channel: &ChannelId,
        position: &CheckpointPosition,
    ) -> Result<(), TunnelError> {
        if self.fail_puts.load(Ordering::Relaxed) {
            return Err(TunnelError::Checkpoint("mock put failure".to_string()));
        }
        self.positions
            .lock()
            .insert(channel.clone(), position.clone());
        self.history
            .lock()
            .push((channel.clone(), position.clone()));
        Ok(())
    }
}

/// Shared observation point for one [`MockProcessor`].
#[derive(Clone, Default)]
pub struct ProcessorProbe {
    inner: Arc<ProbeInner>,
}

struct ProbeInner {
    batches: Mutex<Vec<Vec<Record>>>,
    shutdowns: AtomicU64,
    // u64::MAX means "never fail".
    fail_after: AtomicU64,
}

impl ProcessorProbe {
    /// Fails the `(n+1)`-th `process` call; the first `n` succeed.
    pub fn fail_after(&self, n: u64) {
        self.inner.fail_after.store(n, Ordering::Relaxed);
    }

    /// Number of batches processed so far.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.inner.batches.lock().len() as u64
    }

    /// Total records processed so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.inner
            .batches
            .lock()
            .iter()
            .map(|b| b.len() as u64)
            .sum()
    }

    /// All processed payloads, flattened in delivery order.
    #[must_use]
    pub fn payloads(&self) -> Vec<Bytes> {
        self.inner
            .batches
            .lock()
            .iter()
            .flat_map(|b| b.iter().map(|r| r.payload.clone()))
            .collect()
    }

    /// Number of `shutdown` invocations (must end up exactly 1).
    #[must_use]
    pub fn shutdown_count(&self) -> u64 {
        self.inner.shutdowns.load(Ordering::Relaxed)
    }
}

impl Default for ProbeInner {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            shutdowns: AtomicU64::new(0),
            fail_after: AtomicU64::new(u64::MAX),
        }
    }
}

/// Recording [`RecordProcessor`] driven by a [`ProcessorProbe`].
pub struct MockProcessor {
    probe: ProcessorProbe,
}

impl MockProcessor {
    /// Creates a processor reporting into `probe`.
    #[must_use]
    pub fn new(probe: ProcessorProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl RecordProcessor for MockProcessor {
    async fn process(&mut self, records: Vec<Record>) -> Result<(), TunnelError> {
        let processed = self.probe.inner.batches.lock().len() as u64;
        if processed >= self.probe.inner.fail_after.load(Ordering::Relaxed) {
            return Err(TunnelError::Processing("mock processing failure".into()));
        }
        self.probe.inner.batches.lock().push(records);
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.probe.inner.shutdowns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Factory producing [`MockProcessor`]s, one probe per channel.
#[derive(Default)]
pub struct MockProcessorFactory {
    probes: Mutex<HashMap<ChannelId, ProcessorProbe>>,
    refused: Mutex<HashSet<ChannelId>>,
}

impl MockProcessorFactory {
    /// Creates a factory that accepts every channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the factory refuse `channel` (dial-failure scenarios).
    pub fn refuse(&self, channel: &str) {
        self.refused.lock().insert(ChannelId::new(channel));
    }

    /// The probe observing `channel`'s processor (created on demand).
    #[must_use]
    pub fn probe_for(&self, channel: &str) -> ProcessorProbe {
        self.probes
            .lock()
            .entry(ChannelId::new(channel))
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ProcessorFactory for MockProcessorFactory {
    async fn create(
        &self,
        ctx: &ChannelContext,
        _checkpointer: Arc<Checkpointer>,
    ) -> Result<Box<dyn RecordProcessor>, TunnelError> {
        if self.refused.lock().contains(&ctx.channel_id) {
            return Err(TunnelError::ProcessorCreation(format!(
                "channel {} refused by factory",
                ctx.channel_id
            )));
        }
        let probe = self
            .probes
            .lock()
            .entry(ctx.channel_id.clone())
            .or_default()
            .clone();
        Ok(Box::new(MockProcessor::new(probe)))
    }
}
