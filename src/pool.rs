//! Worker pool - fixed set of sandbox slots
//!
//! Free slot ids sit in a fixed queue guarded by a semaphore holding one
//! permit per free id. Acquiring takes a permit and moves an id out into a
//! [`SlotLease`]; releasing resets the sandbox, puts the id back and adds the
//! permit again. The queue lock is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::sandbox::SandboxGateway;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to initialize any of the {0} sandbox slots")]
    NoSlots(u32),
    /// Set by [`WorkerPool::close`] at shutdown; pending and later acquires fail
    #[error("Worker pool is closed")]
    Closed,
}

pub struct WorkerPool {
    permits: Semaphore,
    free: Mutex<Vec<u32>>,
    gateway: Arc<dyn SandboxGateway>,
    capacity: usize,
}

impl WorkerPool {
    /// Initialize `worker_count` slots. Slots whose sandbox fails to
    /// initialize are left out; only a pool with no slot at all is an error.
    pub async fn init(
        gateway: Arc<dyn SandboxGateway>,
        worker_count: u32,
    ) -> Result<Arc<Self>, PoolError> {
        let mut free = Vec::with_capacity(worker_count as usize);
        for slot in 0..worker_count {
            if let Err(e) = gateway.init(slot).await {
                warn!("Error initializing sandbox for worker {}: {:#}", slot, e);
                continue;
            }
            info!("Worker {} initialized and added to pool", slot);
            free.push(slot);
        }

        if free.is_empty() {
            return Err(PoolError::NoSlots(worker_count));
        }
        if free.len() < worker_count as usize {
            warn!(
                "Only {} out of {} workers initialized",
                free.len(),
                worker_count
            );
        }

        // Lowest ids are handed out first
        free.reverse();
        let capacity = free.len();
        Ok(Arc::new(Self {
            permits: Semaphore::new(capacity),
            free: Mutex::new(free),
            gateway,
            capacity,
        }))
    }

    /// Number of slots that initialized successfully
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop handing out slots. Waiting and future `acquire` calls fail with
    /// [`PoolError::Closed`]; outstanding leases are still returned normally.
    pub fn close(&self) {
        self.permits.close();
    }

    fn free_slots(&self) -> MutexGuard<'_, Vec<u32>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a slot is free and check it out
    pub async fn acquire(self: &Arc<Self>) -> Result<SlotLease, PoolError> {
        let permit = self.permits.acquire().await.map_err(|_| PoolError::Closed)?;
        // One permit per queued id, so the queue is never empty here
        let slot = self.free_slots().pop().ok_or(PoolError::Closed)?;
        permit.forget();
        Ok(SlotLease {
            slot: Some(slot),
            pool: Arc::clone(self),
        })
    }

    fn put_back(&self, slot: u32) {
        self.free_slots().push(slot);
        self.permits.add_permits(1);
    }
}

/// Exclusive ownership of one slot until released.
///
/// Dropping a lease without [`SlotLease::release`] (a cancelled or aborted
/// task) still resets the slot before it becomes available again.
pub struct SlotLease {
    slot: Option<u32>,
    pool: Arc<WorkerPool>,
}

impl SlotLease {
    pub fn id(&self) -> u32 {
        // Only `release` and `drop` take the id, and both consume the lease
        self.slot.unwrap_or_default()
    }

    pub fn gateway(&self) -> Arc<dyn SandboxGateway> {
        Arc::clone(&self.pool.gateway)
    }

    /// Reset the sandbox and hand the slot back. A failed reset is logged and
    /// the slot is returned anyway; the next init repairs it.
    pub async fn release(mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        reset_and_return(&self.pool, slot).await;
    }
}

async fn reset_and_return(pool: &WorkerPool, slot: u32) {
    if let Err(e) = pool.gateway.reset(slot).await {
        error!("Error cleaning up sandbox {}: {:#}", slot, e);
    }
    pool.put_back(slot);
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        warn!("Slot {} dropped without release, resetting in background", slot);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move { reset_and_return(&pool, slot).await });
            }
            Err(_) => {
                error!("No runtime to reset slot {}, returning it unreset", slot);
                self.pool.put_back(slot);
            }
        }
    }
}
