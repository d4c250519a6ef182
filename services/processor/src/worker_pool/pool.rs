//! Worker pool management
//!
//! Manages multiple workers for parallel bet processing.

use anyhow::Result;
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::batch_processor::BatchProcessor;
use super::worker::Worker;

/// Pool of workers for processing bets
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        instance_id: &str,
        batch_processor: Arc<BatchProcessor>,
        interval: Duration,
    ) -> Self {
        let workers = (0..worker_count.max(1))
            .map(|id| Worker::new(id, instance_id, batch_processor.clone(), interval))
            .collect();

        Self {
            workers,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Start all workers and wait for them to stop
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Starting {} workers", self.workers.len());

        let handles: Vec<_> = self
            .workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect();

        try_join_all(handles).await?;
        Ok(())
    }

    /// Stop all workers after their current batch
    pub fn stop(&self) {
        tracing::info!("Stopping worker pool");
        self.shutdown.cancel();
    }
}
