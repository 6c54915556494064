//! Send worker pool.
//!
//! A fixed number of workers pull transfer jobs from one FIFO queue. Each
//! worker drives its job through fees, signing and broadcast before taking
//! the next one, so a worker never has more than one transaction in flight.

use crate::{
    error::{Error, Result},
    wallet::{TransferReceipt, TransferRequest},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

/// Carries out one transfer.
#[async_trait]
pub trait TransferExecutor: Send + Sync + 'static {
    async fn execute(&self, request: TransferRequest) -> Result<TransferReceipt>;
}

struct SendJob {
    request: TransferRequest,
    reply: oneshot::Sender<Result<TransferReceipt>>,
}

pub struct SendWorkerPool {
    jobs: async_channel::Sender<SendJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SendWorkerPool {
    /// Start `workers` workers (at least one) driving `executor`.
    pub fn spawn(executor: Arc<dyn TransferExecutor>, workers: usize) -> Self {
        let (jobs, queue) = async_channel::unbounded::<SendJob>();
        let handles = (0..workers.max(1))
            .map(|index| {
                let queue = queue.clone();
                let executor = executor.clone();
                tokio::spawn(async move {
                    while let Ok(job) = queue.recv().await {
                        debug!("Worker {} sending to {}", index, job.request.to);
                        let result = executor.execute(job.request).await;
                        if let Err(e) = &result {
                            warn!("Worker {} transfer failed: {}", index, e);
                        }
                        // The submitter may have given up waiting.
                        let _ = job.reply.send(result);
                    }
                    debug!("Worker {} stopped", index);
                })
            })
            .collect();

        info!("Started {} send workers", workers.max(1));
        Self {
            jobs,
            workers: Mutex::new(handles),
        }
    }

    /// Queue `request` and wait for its outcome.
    pub async fn submit(&self, request: TransferRequest) -> Result<TransferReceipt> {
        let (reply, outcome) = oneshot::channel();
        self.jobs
            .send(SendJob { request, reply })
            .await
            .map_err(|_| Error::PoolClosed)?;
        outcome.await.map_err(|_| Error::PoolClosed)?
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    /// Stop accepting jobs, let workers finish the queue, then wait for them.
    pub async fn close(&self) {
        self.jobs.close();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Send worker ended abnormally: {}", e);
            }
        }
    }
}
