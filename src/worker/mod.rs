use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::engine::execute_step;
use crate::queue::{FailureOutcome, QueueError, ReservedJob};
use crate::state::EngineState;

const QUEUE_ERROR_BACKOFF: Duration = Duration::from_millis(1000);

/// Spawns `settings.concurrency` step consumers. They stop once `shutdown`
/// flips to true or its sender is dropped.
pub fn start_step_workers(
    state: EngineState,
    settings: &WorkerSettings,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let node = std::process::id();
    (0..settings.concurrency)
        .map(|n| {
            let worker_id = format!("step-worker-{node}-{n}");
            tokio::spawn(run_worker(
                state.clone(),
                worker_id,
                settings.poll_interval,
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    state: EngineState,
    worker_id: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%worker_id, "step worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match state.queue.reserve(&worker_id).await {
            Ok(Some(reserved)) => match process_job(&state, reserved).await {
                Ok(()) => None,
                Err(err) => {
                    error!(%worker_id, %err, "failed to settle job");
                    Some(QUEUE_ERROR_BACKOFF)
                }
            },
            Ok(None) => Some(poll_interval),
            Err(err) => {
                error!(%worker_id, %err, "error reserving job");
                Some(QUEUE_ERROR_BACKOFF)
            }
        };

        if let Some(wait) = idle {
            tokio::select! {
                _ = sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    info!(%worker_id, "step worker stopped");
}

/// Executes one reserved job and reports the result back to the queue.
pub async fn process_job(state: &EngineState, reserved: ReservedJob) -> Result<(), QueueError> {
    let job_id = reserved.id;
    match execute_step(state, &reserved.job).await {
        Ok(outcome) => {
            debug!(%job_id, ?outcome, "job finished");
            state.queue.complete(&job_id).await
        }
        Err(err) => {
            let outcome = state
                .queue
                .fail(&job_id, &err.to_string(), err.is_retriable())
                .await?;
            match outcome {
                FailureOutcome::Retrying { attempt, retry_in } => warn!(
                    %job_id,
                    attempt,
                    retry_in_ms = retry_in.as_millis() as u64,
                    %err,
                    "job failed; retrying"
                ),
                FailureOutcome::Exhausted { attempts } => error!(
                    %job_id,
                    attempts,
                    %err,
                    "job failed permanently"
                ),
            }
            Ok(())
        }
    }
}
