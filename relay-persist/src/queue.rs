use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::{apply, PersistenceTask, RelayStore};

/// Worker-pool tuning for the persistence queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum tasks applied concurrently.
    pub workers: usize,
    /// Total attempts per task (first try included).
    pub max_attempts: u32,
    /// Base delay between retries, scaled linearly by attempt number.
    pub retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Clonable enqueue handle for the persistence worker pool.
///
/// `enqueue` returns immediately and never surfaces storage errors to the
/// caller; the real-time path must not block on, or fail because of, the
/// durable path.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::UnboundedSender<PersistenceTask>,
}

impl PersistenceQueue {
    /// Start the dispatcher and worker pool against the given store.
    ///
    /// The returned handle completes once every queue handle is dropped
    /// and all in-flight tasks have finished.
    pub fn start(store: Arc<dyn RelayStore>, config: QueueConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_workers(store, rx, config));
        (Self { tx }, handle)
    }

    /// Hand a task to the worker pool. Fire-and-forget.
    pub fn enqueue(&self, task: PersistenceTask) {
        if self.tx.send(task).is_err() {
            tracing::warn!("persistence queue is shut down; task dropped");
        }
    }
}

async fn run_workers(
    store: Arc<dyn RelayStore>,
    mut rx: mpsc::UnboundedReceiver<PersistenceTask>,
    config: QueueConfig,
) {
    let semaphore = Arc::new(Semaphore::new(config.workers));
    while let Some(task) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let store = store.clone();
        tokio::spawn(async move {
            apply_with_retry(store.as_ref(), &task, config).await;
            drop(permit);
        });
    }
    // Queue closed: wait for in-flight tasks before completing.
    let _ = semaphore.acquire_many(config.workers as u32).await;
}

async fn apply_with_retry(store: &dyn RelayStore, task: &PersistenceTask, config: QueueConfig) {
    let mut attempt: u32 = 1;
    loop {
        match apply(store, task).await {
            Ok(()) => return,
            Err(err) if err.is_transient() && attempt < config.max_attempts => {
                tracing::warn!(
                    kind = task.kind(),
                    attempt,
                    error = %err,
                    "transient persistence failure, retrying"
                );
                tokio::time::sleep(config.retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    kind = task.kind(),
                    attempt,
                    error = %err,
                    "permanent persistence failure, task dropped"
                );
                return;
            }
        }
    }
}
