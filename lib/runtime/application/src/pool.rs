use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    /// Permits still owed after a shrink found too few idle ones to forget.
    debt: usize,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

/// Reusable worker slot pool for one operation class.
///
/// Resizing happens in place. Shrinking forgets idle permits immediately;
/// permits held by in-flight work are retired as they are released, so the
/// number of concurrently held permits never exceeds the latest capacity once
/// the in-flight work drains.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                state: Mutex::new(PoolState { capacity, debt: 0 }),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state().capacity
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn resize(&self, capacity: usize) {
        let mut state = self.state();
        if capacity == state.capacity {
            return;
        }
        if capacity > state.capacity {
            let grow = capacity - state.capacity;
            let repaid = grow.min(state.debt);
            state.debt -= repaid;
            self.inner.semaphore.add_permits(grow - repaid);
        } else {
            let shrink = state.capacity - capacity;
            let forgotten = self.inner.semaphore.forget_permits(shrink);
            state.debt += shrink - forgotten;
        }
        tracing::debug!(
            from = state.capacity,
            to = capacity,
            debt = state.debt,
            "worker pool resized"
        );
        state.capacity = capacity;
    }

    pub async fn acquire(&self) -> Result<WorkerPermit> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("worker pool closed")?;
        Ok(WorkerPermit {
            permit: Some(permit),
            pool: self.inner.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Slot held for the duration of one operation.
#[derive(Debug)]
pub struct WorkerPermit {
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        // Released under the state lock; a concurrent shrink must see either
        // the debt or the idle permit.
        let mut state = self.pool.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.debt > 0 {
            state.debt -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}
