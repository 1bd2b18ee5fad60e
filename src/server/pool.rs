// src/server/pool.rs

//! A bounded worker pool for one pipeline stage.

use crate::core::errors::TicketboxError;
use crate::core::metrics;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Runs at most `size` tasks at once. `submit` waits for a free worker, so a
/// saturated pool pushes back on whoever feeds it. Callers that must not wait
/// use `try_reserve` and start the task later with `spawn_with`.
#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        debug!("Worker pool '{}' created with {} workers.", name, size);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers currently running a task.
    pub fn busy(&self) -> usize {
        if self.permits.is_closed() {
            return self.tracker.len();
        }
        self.size - self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Claims a free worker without waiting. `Ok(None)` means every worker is
    /// busy.
    pub fn try_reserve(&self) -> Result<Option<OwnedSemaphorePermit>, TicketboxError> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(TicketboxError::PoolClosed(self.name)),
        }
    }

    /// Waits until a worker is free and claims it.
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit, TicketboxError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TicketboxError::PoolClosed(self.name))
    }

    /// Starts `task` on the worker claimed by `permit`. The worker is freed
    /// when the task finishes.
    pub fn spawn_with<F>(&self, permit: OwnedSemaphorePermit, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(async move {
            let _permit = permit;
            task.await;
        });
    }

    /// Waits for a free worker and starts `task` on it.
    ///
    /// Fails once the pool is closed; `task` is dropped in that case.
    pub async fn submit<F>(&self, task: F) -> Result<(), TicketboxError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.reserve().await?;
        self.spawn_with(permit, task);
        Ok(())
    }

    /// Stops accepting new tasks. Tasks already running are unaffected.
    pub fn close(&self) {
        self.permits.close();
        self.tracker.close();
    }

    /// Resolves once the pool is closed and every started task has finished.
    pub async fn drain(&self) {
        self.tracker.wait().await;
        debug!("Worker pool '{}' drained.", self.name);
    }

    pub(crate) fn publish_metrics(&self) {
        metrics::POOL_BUSY_WORKERS
            .with_label_values(&[self.name])
            .set(self.busy() as f64);
    }
}
