//! Queue Workers
//!
//! Pulls jobs out of the durable queues and runs them through a handler,
//! keeping at most a fixed number of jobs in flight per pool. Completed
//! jobs are acked out of the queue; failed jobs are removed without retry
//! and a later cycle re-detects whatever work remains.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::queue::{JobRecord, QueueName};
use crate::state::StateStore;

/// Processes jobs claimed from a queue
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Process one job. A returned error fails the job permanently.
    async fn process(&self, job: JobRecord) -> Result<()>;
}

/// Bounded worker pool draining a single queue
pub struct WorkerPool {
    store: Arc<StateStore>,
    queue: QueueName,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        store: Arc<StateStore>,
        queue: QueueName,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Run the pool until the shutdown token fires, then drain in-flight jobs
    pub async fn run(self, handler: Arc<dyn JobHandler>, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        info!(
            "Worker pool started for {} queue (concurrency {})",
            self.queue, self.concurrency
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let available = semaphore.available_permits();
            if available == 0 {
                // Every worker is busy; wait for one to free up
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => drop(permit),
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            let batch = match self.store.dequeue(self.queue, available).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to claim jobs from {} queue: {}", self.queue, e);
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            for job in batch {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let store = self.store.clone();
                let handler = handler.clone();
                let queue = self.queue;
                tokio::spawn(async move {
                    let id = job.id;
                    match handler.process(job).await {
                        Ok(()) => {
                            debug!("Job {} on {} queue completed", id, queue);
                            if let Err(e) = store.ack(id).await {
                                warn!("Failed to ack job {} on {} queue: {}", id, queue, e);
                            }
                        }
                        Err(e) => {
                            warn!("Job {} on {} queue failed: {}", id, queue, e);
                            if let Err(e) = store.fail(id).await {
                                warn!("Failed to remove failed job {}: {}", id, e);
                            }
                        }
                    }
                    drop(permit);
                });
            }
        }

        // Wait for in-flight jobs before returning so acks land
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!("Worker pool stopped for {} queue", self.queue);
    }
}
