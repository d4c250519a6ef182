//! Individual worker implementation
//!
//! Each worker claims under its own processor id so batch ownership is
//! traceable per worker.

use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::batch_processor::BatchProcessor;

/// Individual worker for processing bets
#[derive(Clone)]
pub struct Worker {
    pub id: usize,
    processor_id: String,
    batch_processor: Arc<BatchProcessor>,
    interval: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        instance_id: &str,
        batch_processor: Arc<BatchProcessor>,
        interval: Duration,
    ) -> Self {
        Self {
            id,
            processor_id: format!("{}-worker-{}", instance_id, id),
            batch_processor,
            interval,
        }
    }

    pub fn processor_id(&self) -> &str {
        &self.processor_id
    }

    /// Run the worker's main processing loop until cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(worker_id = self.id, processor_id = %self.processor_id, "Worker started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A batch in flight is finished before shutdown is observed
            match self.batch_processor.process_batch(&self.processor_id).await {
                Ok(Some(summary)) => {
                    tracing::debug!(
                        worker_id = self.id,
                        batch_id = %summary.batch_id,
                        "Worker settled batch"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = ?e, "Batch processing error");
                    metrics::counter!("worker_errors_total").increment(1);
                }
            }
        }

        tracing::info!(worker_id = self.id, "Worker stopped");
    }
}
