//! Bounded task group with an explicit join barrier.
//!
//! Tasks are spawned immediately but each waits for a semaphore permit before
//! doing work, so at most `limit` run at once. [`BoundedFanOut::join`] is the
//! barrier: it returns once every task has finished, or at the first failure.

use crate::error::AppError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Concurrent sub-fetch tasks allowed per pull request page batch.
pub const PR_FETCH_CONCURRENCY: usize = 10;

pub struct BoundedFanOut {
    semaphore: Arc<Semaphore>,
    handles: Vec<JoinHandle<Result<(), AppError>>>,
}

impl BoundedFanOut {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            handles: Vec::new(),
        }
    }

    /// Queue a task. It starts as soon as a permit is free.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // closed after another task failed: skip the work
                Err(_) => return Ok(()),
            };
            task.await
        });
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every queued task.
    ///
    /// On the first error, tasks still waiting for a permit are skipped and
    /// tasks already running are left to finish on their own.
    pub async fn join(self) -> Result<(), AppError> {
        let mut pending: FuturesUnordered<_> = self.handles.into_iter().collect();

        while let Some(joined) = pending.next().await {
            let outcome = joined
                .map_err(|e| AppError::internal(format!("Fan-out task failed: {}", e)))
                .and_then(|result| result);

            if let Err(e) = outcome {
                self.semaphore.close();
                return Err(e);
            }
        }

        Ok(())
    }
}
