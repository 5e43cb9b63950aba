use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::engine::audit::{STEP_COMPLETED, STEP_FAILED, WORKFLOW_COMPLETED};
use crate::engine::error::EngineError;
use crate::engine::templating::render_and_sanitize;
use crate::models::activity::{ActivityType, NewActivity, ACTIVITY_STATUS_OPEN, ACTIVITY_STATUS_SENT};
use crate::models::automation::{
    ActionConfig, CreateTaskConfig, MoveOpportunityConfig, SendEmailConfig, SendSmsConfig,
};
use crate::models::contact::Contact;
use crate::models::message::{Channel, Direction, NewMessage};
use crate::models::workflow_step_run::{StepStatus, WorkflowStepRun};
use crate::queue::{StepJob, STEP_JOB_SCHEMA_VERSION};
use crate::state::EngineState;

const MESSAGE_STATUS_SENT: &str = "sent";

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed { output: Value },
    /// The step had already completed; nothing was done.
    AlreadyCompleted,
    /// The step no longer exists in the job's workspace.
    Dropped,
}

/// Executes one step job at most once per step.
///
/// The step is claimed with a compare-and-swap before any side effect. A
/// COMPLETED step short-circuits, and a RUNNING step is left to its holder
/// until its lease goes stale. On failure after the claim the step is put
/// back to QUEUED so the queue's retry can pick it up again.
pub async fn execute_step(state: &EngineState, job: &StepJob) -> Result<StepOutcome, EngineError> {
    if job.schema_version != STEP_JOB_SCHEMA_VERSION {
        return Err(EngineError::InvalidJob(format!(
            "unsupported step job schema version {}",
            job.schema_version
        )));
    }
    let config = job.action_config().map_err(|e| {
        EngineError::InvalidJob(format!(
            "action {} has a malformed {} config: {e}",
            job.action_id, job.action_type
        ))
    })?;
    let ws = &job.workspace_id;

    let Some(step) = state
        .runs
        .find_step_run(ws, &job.workflow_run_id, &job.action_id)
        .await?
    else {
        warn!(
            workspace_id = %ws,
            workflow_run_id = %job.workflow_run_id,
            action_id = %job.action_id,
            "step run not found; dropping job"
        );
        return Ok(StepOutcome::Dropped);
    };

    if step.status == StepStatus::Completed {
        debug!(step_id = %step.id, "step already completed");
        finish_run_if_done(state, job, None).await;
        return Ok(StepOutcome::AlreadyCompleted);
    }

    let now = OffsetDateTime::now_utc();
    let stale_before = now - state.step_lease;
    let Some(step) = state
        .runs
        .try_start_step(ws, &step.id, now, stale_before)
        .await?
    else {
        let current = state
            .runs
            .find_step_run(ws, &job.workflow_run_id, &job.action_id)
            .await?;
        return match current {
            Some(current) if current.status == StepStatus::Completed => {
                Ok(StepOutcome::AlreadyCompleted)
            }
            _ => Err(EngineError::StepBusy { step_id: step.id }),
        };
    };

    match run_claimed_step(state, job, &step, &config).await {
        Ok(output) => Ok(StepOutcome::Completed { output }),
        Err(err) => {
            if let Err(release_err) = state.runs.release_step(ws, &step.id).await {
                warn!(step_id = %step.id, err = %release_err, "failed to release step after error");
            }
            warn!(
                workspace_id = %ws,
                workflow_run_id = %job.workflow_run_id,
                action_id = %job.action_id,
                %err,
                "workflow step failed"
            );
            if let Some(automation_id) = automation_for_run(state, job).await {
                state
                    .audit
                    .record(
                        ws,
                        &automation_id,
                        STEP_FAILED,
                        json!({
                            "workflowRunId": job.workflow_run_id,
                            "actionId": job.action_id,
                            "error": err.to_string(),
                        }),
                    )
                    .await;
            }
            Err(err)
        }
    }
}

async fn run_claimed_step(
    state: &EngineState,
    job: &StepJob,
    step: &WorkflowStepRun,
    config: &ActionConfig,
) -> Result<Value, EngineError> {
    let ws = &job.workspace_id;
    state.runs.mark_run_running(ws, &job.workflow_run_id).await?;

    let action = state
        .automations
        .find_action(ws, &job.action_id)
        .await?
        .ok_or_else(|| EngineError::not_found("action", &job.action_id))?;

    let output = match config {
        ActionConfig::Wait(_) => json!({ "waited": true }),
        ActionConfig::SendSms(cfg) => send_sms(state, job, cfg).await?,
        ActionConfig::SendEmail(cfg) => send_email(state, job, cfg).await?,
        ActionConfig::CreateTask(cfg) => create_task(state, job, cfg).await?,
        ActionConfig::MoveOpportunity(cfg) => move_opportunity(state, job, cfg).await?,
    };

    let now = OffsetDateTime::now_utc();
    state
        .runs
        .complete_step(ws, &step.id, output.clone(), now)
        .await?;
    info!(
        workspace_id = %ws,
        workflow_run_id = %job.workflow_run_id,
        action_id = %job.action_id,
        action_type = %job.action_type,
        "workflow step completed"
    );
    state
        .audit
        .record(
            ws,
            &action.automation_id,
            STEP_COMPLETED,
            json!({ "workflowRunId": job.workflow_run_id, "actionId": job.action_id }),
        )
        .await;

    finish_run_if_done(state, job, Some(&action.automation_id)).await;
    Ok(output)
}

/// Moves the run to completed once its last step is done. Errors are only
/// logged; the step itself has already been committed.
async fn finish_run_if_done(state: &EngineState, job: &StepJob, automation_id: Option<&str>) {
    let ws = &job.workspace_id;
    match state
        .runs
        .complete_run_if_finished(ws, &job.workflow_run_id, OffsetDateTime::now_utc())
        .await
    {
        Ok(true) => {
            info!(workspace_id = %ws, workflow_run_id = %job.workflow_run_id, "workflow run completed");
            let automation_id = match automation_id {
                Some(id) => Some(id.to_string()),
                None => automation_for_run(state, job).await,
            };
            if let Some(automation_id) = automation_id {
                state
                    .audit
                    .record(
                        ws,
                        &automation_id,
                        WORKFLOW_COMPLETED,
                        json!({ "workflowRunId": job.workflow_run_id }),
                    )
                    .await;
            }
        }
        Ok(false) => {}
        Err(err) => warn!(
            workspace_id = %ws,
            workflow_run_id = %job.workflow_run_id,
            %err,
            "failed to check workflow run completion"
        ),
    }
}

async fn automation_for_run(state: &EngineState, job: &StepJob) -> Option<String> {
    match state
        .runs
        .find_run(&job.workspace_id, &job.workflow_run_id)
        .await
    {
        Ok(run) => run.map(|r| r.automation_id),
        Err(err) => {
            warn!(workflow_run_id = %job.workflow_run_id, %err, "failed to load workflow run");
            None
        }
    }
}

/// The trigger's `contactId` wins over the action's own; either is looked up
/// inside the job's workspace only.
async fn resolve_contact(
    state: &EngineState,
    job: &StepJob,
    configured: Option<&str>,
) -> Result<Option<Contact>, EngineError> {
    let contact_id = job
        .trigger_payload
        .get("contactId")
        .and_then(Value::as_str)
        .or(configured)
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let Some(contact_id) = contact_id else {
        return Ok(None);
    };
    let contact = state.crm.find_contact(&job.workspace_id, contact_id).await?;
    if contact.is_none() {
        debug!(workspace_id = %job.workspace_id, contact_id, "contact not found in workspace");
    }
    Ok(contact)
}

fn delivery_output(delivered: bool, provider_message_id: Option<String>) -> Value {
    json!({
        "ok": true,
        "delivered": delivered,
        "providerMessageId": provider_message_id,
    })
}

async fn send_sms(
    state: &EngineState,
    job: &StepJob,
    cfg: &SendSmsConfig,
) -> Result<Value, EngineError> {
    let ws = &job.workspace_id;
    let contact = resolve_contact(state, job, cfg.contact_id.as_deref()).await?;
    let body = render_and_sanitize(cfg.template(), contact.as_ref());

    let mut provider_message_id = None;
    let phone = contact.as_ref().and_then(|c| c.phone_number().map(|p| (c, p)));
    if let (Some(sms), Some((contact, phone))) = (&state.sms, phone) {
        let sid = sms.send(phone, &body).await?;
        let thread = state
            .crm
            .find_or_create_thread(ws, &contact.id, Channel::Sms)
            .await?;
        state
            .crm
            .insert_message(NewMessage {
                workspace_id: ws.clone(),
                thread_id: thread.id,
                channel: Channel::Sms,
                direction: Direction::Out,
                status: MESSAGE_STATUS_SENT.to_string(),
                body: body.clone(),
                provider_id: Some(sid.clone()),
            })
            .await?;
        provider_message_id = Some(sid);
    }

    // Recorded as sent even when nothing went out.
    state
        .crm
        .insert_activity(NewActivity {
            workspace_id: ws.clone(),
            contact_id: contact.as_ref().map(|c| c.id.clone()),
            activity_type: ActivityType::Sms,
            body,
            status: ACTIVITY_STATUS_SENT.to_string(),
        })
        .await?;

    Ok(delivery_output(
        provider_message_id.is_some(),
        provider_message_id,
    ))
}

async fn send_email(
    state: &EngineState,
    job: &StepJob,
    cfg: &SendEmailConfig,
) -> Result<Value, EngineError> {
    let contact = resolve_contact(state, job, cfg.contact_id.as_deref()).await?;
    let subject = render_and_sanitize(cfg.subject.as_deref().unwrap_or_default(), contact.as_ref());
    let html = render_and_sanitize(cfg.body.as_deref().unwrap_or_default(), contact.as_ref());

    let mut delivered = false;
    let mut provider_message_id = None;
    let address = contact.as_ref().and_then(Contact::email_address);
    if let (Some(email), Some(address)) = (&state.email, address) {
        provider_message_id = email.send(address, &subject, &html).await?;
        delivered = true;
    }

    state
        .crm
        .insert_activity(NewActivity {
            workspace_id: job.workspace_id.clone(),
            contact_id: contact.as_ref().map(|c| c.id.clone()),
            activity_type: ActivityType::Email,
            body: format!("{subject}\n{html}"),
            status: ACTIVITY_STATUS_SENT.to_string(),
        })
        .await?;

    Ok(delivery_output(delivered, provider_message_id))
}

async fn create_task(
    state: &EngineState,
    job: &StepJob,
    cfg: &CreateTaskConfig,
) -> Result<Value, EngineError> {
    let contact = resolve_contact(state, job, cfg.contact_id.as_deref()).await?;
    state
        .crm
        .insert_activity(NewActivity {
            workspace_id: job.workspace_id.clone(),
            contact_id: contact.map(|c| c.id),
            activity_type: ActivityType::Task,
            body: cfg.body().to_string(),
            status: ACTIVITY_STATUS_OPEN.to_string(),
        })
        .await?;
    Ok(json!({ "ok": true }))
}

async fn move_opportunity(
    state: &EngineState,
    job: &StepJob,
    cfg: &MoveOpportunityConfig,
) -> Result<Value, EngineError> {
    let ids = cfg
        .opportunity_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .zip(cfg.stage_id.as_deref().filter(|id| !id.is_empty()));

    let moved = match ids {
        Some((opportunity_id, stage_id)) => {
            state
                .crm
                .move_opportunity_stage(&job.workspace_id, opportunity_id, stage_id)
                .await?
        }
        None => false,
    };
    Ok(json!({ "ok": true, "moved": moved }))
}
