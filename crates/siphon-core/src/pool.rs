//! Shared worker pools.
//!
//! Two fixed-size permit pools serve all channels: one bounds concurrent
//! read calls, the other bounds concurrent processing calls. A channel's
//! read and process steps are serialized per channel by its pipeline; the
//! pools only bound cross-channel parallelism. They are the sole resource
//! shared across channels.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::TunnelError;

/// Permit pools shared by every channel pipeline of one tunnel client.
#[derive(Debug, Clone)]
pub struct WorkerPools {
    read: Arc<Semaphore>,
    process: Arc<Semaphore>,
}

impl WorkerPools {
    /// Creates pools with the given permit counts.
    #[must_use]
    pub fn new(read_workers: usize, process_workers: usize) -> Self {
        Self {
            read: Arc::new(Semaphore::new(read_workers.max(1))),
            process: Arc::new(Semaphore::new(process_workers.max(1))),
        }
    }

    /// Acquires a read slot; waits while the pool is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::PoolClosed`] once the pools are closed.
    pub async fn acquire_read(&self) -> Result<SemaphorePermit<'_>, TunnelError> {
        self.read
            .acquire()
            .await
            .map_err(|_| TunnelError::PoolClosed)
    }

    /// Acquires a process slot; waits while the pool is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::PoolClosed`] once the pools are closed.
    pub async fn acquire_process(&self) -> Result<SemaphorePermit<'_>, TunnelError> {
        self.process
            .acquire()
            .await
            .map_err(|_| TunnelError::PoolClosed)
    }

    /// Closes both pools. Pending and future acquires fail with
    /// [`TunnelError::PoolClosed`]; permits already held stay valid until
    /// dropped, so in-flight steps finish naturally.
    pub fn close(&self) {
        self.read.close();
        self.process.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_parallelism() {
        let pools = WorkerPools::new(2, 1);
        let a = pools.acquire_read().await.unwrap();
        let _b = pools.acquire_read().await.unwrap();
        // Third read must wait until a permit is released.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), pools.acquire_read())
                .await
                .is_err()
        );
        drop(a);
        assert!(pools.acquire_read().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_acquires() {
        let pools = WorkerPools::new(1, 1);
        pools.close();
        assert!(matches!(
            pools.acquire_read().await,
            Err(TunnelError::PoolClosed)
        ));
        assert!(matches!(
            pools.acquire_process().await,
            Err(TunnelError::PoolClosed)
        ));
    }
}
