//! Worker Pool
//!
//! Fixed number of connection slots. The accept loop waits for a free slot
//! before handing a connection to its task, so at most `size` connections
//! are served at once and further clients queue in the listen backlog.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Bounded pool of connection slots.
#[derive(Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
}

/// A held slot. Dropping it frees the slot.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool {
    /// Creates a pool with `size` slots (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        WorkerPool {
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits until a slot is free.
    ///
    /// Returns `None` only if the pool has been closed.
    pub async fn acquire(&self) -> Option<WorkerSlot> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| WorkerSlot { _permit: permit })
    }

    /// Takes a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => Some(WorkerSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Stops handing out slots; pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Number of slots currently held.
    pub fn busy(&self) -> usize {
        self.size - self.slots.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
