//! In-process job queue: a channel-backed [`Dispatcher`] and the worker loop
//! that drains it.

use crate::error::{Result, ScribedError};
use crate::job::JobId;
use crate::orchestrator::{Dispatcher, Orchestrator};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Sends dispatched job ids over a bounded channel.
#[derive(Debug)]
pub struct ChannelDispatcher {
    tx: Mutex<Option<mpsc::Sender<JobId>>>,
}

impl ChannelDispatcher {
    /// Creates the dispatcher and the receiving end for [`run_worker`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobId>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Stops accepting jobs. The worker finishes what is queued and returns.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn dispatch(&self, job_id: &JobId) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ScribedError::Other("job queue is closed".to_string()))?;
        tx.send(job_id.clone())
            .await
            .map_err(|_| ScribedError::Other("job queue is closed".to_string()))
    }
}

/// Runs dispatched jobs, at most `concurrency` at a time, until the channel
/// closes. Returns how many jobs were run.
pub async fn run_worker(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::Receiver<JobId>,
    concurrency: usize,
) -> usize {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut started = 0;
    info!(concurrency, "Worker started");

    while let Some(job_id) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let orchestrator = orchestrator.clone();
        started += 1;
        debug!(job_id = %job_id, "Job picked up");
        tasks.spawn(async move {
            let _permit = permit;
            match orchestrator.run(&job_id).await {
                Ok(job) => debug!(job_id = %job_id, status = %job.status, "Job run finished"),
                Err(e) => error!(job_id = %job_id, error = %e, "Job could not be run"),
            }
        });
        while tasks.try_join_next().is_some() {}
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Job task panicked");
        }
    }
    info!(jobs = started, "Worker stopped");
    started
}
