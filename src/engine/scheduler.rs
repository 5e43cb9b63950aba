use tracing::{debug, info};

use crate::engine::error::EngineError;
use crate::models::automation::Action;
use crate::models::event::Payload;
use crate::models::workflow_step_run::WorkflowStepRun;
use crate::queue::{EnqueueOutcome, JobQueue, StepJob};

/// Enqueues the job for one step, delayed by the action's wait time.
///
/// The job id is the step's idempotency key, so scheduling the same step
/// twice leaves a single job behind and reports [`EnqueueOutcome::Duplicate`].
pub async fn schedule_step(
    queue: &dyn JobQueue,
    step: &WorkflowStepRun,
    action: &Action,
    trigger_payload: &Payload,
) -> Result<EnqueueOutcome, EngineError> {
    if step.action_id != action.id || step.workspace_id != action.workspace_id {
        return Err(EngineError::InvalidJob(format!(
            "step {} does not belong to action {}",
            step.id, action.id
        )));
    }

    let delay = action.config.schedule_delay();
    let job = StepJob::for_step(step, action, trigger_payload);
    let outcome = queue.enqueue(job, delay).await?;

    match outcome {
        EnqueueOutcome::Enqueued => info!(
            workspace_id = %step.workspace_id,
            workflow_run_id = %step.workflow_run_id,
            action_id = %action.id,
            job_id = %step.idempotency_key,
            delay_ms = delay.as_millis() as u64,
            "workflow step scheduled"
        ),
        EnqueueOutcome::Duplicate => debug!(
            job_id = %step.idempotency_key,
            "workflow step already scheduled"
        ),
    }
    Ok(outcome)
}
