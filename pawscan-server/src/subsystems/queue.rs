//! Simulation job queue
//!
//! Bounded mpsc channel drained by a single worker loop. Each job gets a
//! wall-clock timeout and a small number of whole-job retries, independent
//! of the per-variant retry loop inside the job itself. Age progression must
//! never block the request that triggered it: callers only enqueue.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::subsystems::simulate::{self, JobDeps};

/// One queued unit of work.
#[derive(Debug, Clone, Copy)]
pub struct SimulationJob {
    pub scan_id: Uuid,
}

/// Cloneable handle for enqueuing jobs.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::Sender<SimulationJob>,
}

impl JobSender {
    /// Enqueue without blocking the caller beyond channel backpressure.
    /// A full queue is logged and dropped; the scan stays in `queued` and a
    /// regenerate can re-dispatch it.
    pub async fn dispatch(&self, scan_id: Uuid) -> bool {
        match self.tx.send(SimulationJob { scan_id }).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(scan_id = %scan_id, error = %e, "Failed to enqueue simulation job");
                false
            }
        }
    }

    /// Channel wired to nothing — for tests and the `--health` fast path.
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<SimulationJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

/// Spawn the worker loop and return the enqueue handle.
pub fn start_worker(deps: JobDeps, shutdown: broadcast::Receiver<()>) -> JobSender {
    let (tx, rx) = mpsc::channel(deps.config.queue_capacity);
    tokio::spawn(run_worker_loop(deps, rx, shutdown));
    JobSender { tx }
}

async fn run_worker_loop(
    deps: JobDeps,
    mut rx: mpsc::Receiver<SimulationJob>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(
        capacity = deps.config.queue_capacity,
        timeout_secs = deps.config.job_timeout_secs,
        "Simulation worker started"
    );

    loop {
        tokio::select! {
            job = rx.recv() => {
                match job {
                    Some(job) => process_job(&deps, job).await,
                    None => break,
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Simulation worker shutting down...");
                break;
            }
        }
    }
}

/// Run one job with its timeout, retrying the whole job a bounded number of
/// times on failure.
async fn process_job(deps: &JobDeps, job: SimulationJob) {
    let timeout = Duration::from_secs(deps.config.job_timeout_secs);

    for round in 0..=deps.config.job_retries {
        match tokio::time::timeout(timeout, simulate::run_simulation_job(deps, job.scan_id)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                tracing::warn!(
                    scan_id = %job.scan_id,
                    round = round,
                    error = %e,
                    "Simulation job failed"
                );
            }
            Err(_elapsed) => {
                tracing::warn!(
                    scan_id = %job.scan_id,
                    round = round,
                    timeout_secs = deps.config.job_timeout_secs,
                    "Simulation job timed out"
                );
                simulate::record_job_timeout(deps, job.scan_id).await;
            }
        }
    }

    tracing::error!(scan_id = %job.scan_id, "Simulation job exhausted queue-level retries");
}
