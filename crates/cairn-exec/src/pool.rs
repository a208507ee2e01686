use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Bounds the number of live worker processes.
#[derive(Clone, Debug)]
pub struct ProcessPool {
    semaphore: Arc<Semaphore>,
    max: usize,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// A reserved worker slot, released on drop.
#[derive(Debug)]
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
    live: Arc<AtomicUsize>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProcessPool {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            live: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot. Returns `None` if `cancellation` fires first.
    pub async fn acquire(&self, cancellation: &CancellationToken) -> Option<PoolPermit> {
        let permit = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok()?,
        };
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        Some(PoolPermit {
            _permit: permit,
            live: Arc::clone(&self.live),
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Slots currently held.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of slots held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
