//! Bounded pool for CPU-bound steps of request handling.

use std::{num::NonZeroUsize, sync::Arc};

use tokio::{sync::Semaphore, task};
use tracing::debug;

use super::error::AccessError;

/// Runs closures on tokio's blocking threads, at most `size` at a time.
///
/// Callers queue on the semaphore rather than being rejected. A dispatched job
/// always runs to completion even if the awaiting request goes away.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.get())),
        }
    }

    pub async fn dispatch<F, T>(&self, job: F) -> Result<T, AccessError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AccessError::worker_pool("worker pool closed"))?;

        debug!(
            target = "restcache::coordinator",
            available = self.semaphore.available_permits(),
            "dispatching job"
        );

        task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|err| AccessError::worker_pool(format!("worker job failed: {err}")))
    }
}
