// ivr-core/src/pool.rs
use std::future::Future;
use std::sync::Arc;

use ivr_common::error::{IvrError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::cancel::CancelSignal;

/// Runs batches of fetch jobs on at most `workers` concurrent tasks. Results
/// come back in submission order regardless of completion order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    cancel: CancelSignal,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancelSignal) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            cancel,
        }
    }

    /// Runs `job` for every key. Individual failures are returned alongside
    /// their key; only cancellation or a crashed task fails the batch, in
    /// which case every outstanding task is aborted.
    pub async fn run<K, T, F, Fut>(&self, keys: Vec<K>, job: F) -> Result<Vec<(K, Result<T>)>>
    where
        T: Send + 'static,
        F: Fn(&K) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.cancel.check()?;
        let mut tasks = JoinSet::new();
        for (index, key) in keys.iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let work = job(key);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, work.await)
            });
        }
        debug!("Dispatched {} job(s)", keys.len());

        let mut results: Vec<Option<Result<T>>> = keys.iter().map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(IvrError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, result))) => results[index] = Some(result),
                    Some(Err(e)) => {
                        error!("Worker task failed: {}", e);
                        tasks.abort_all();
                        return Err(IvrError::Generic(format!("worker task failed: {e}")));
                    }
                }
            }
        }

        Ok(keys
            .into_iter()
            .zip(results)
            .map(|(key, result)| {
                let result = result
                    .unwrap_or_else(|| Err(IvrError::Generic("worker produced no result".into())));
                (key, result)
            })
            .collect())
    }
}
