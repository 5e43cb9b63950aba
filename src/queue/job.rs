use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::automation::{Action, ActionConfig, ActionType};
use crate::models::event::Payload;
use crate::models::workflow_step_run::{idempotency_key, WorkflowStepRun};
use crate::models::workspace::WorkspaceId;

pub const STEP_JOB_SCHEMA_VERSION: u32 = 1;

/// Payload of one `workflow-step` job.
///
/// The action's config travels untyped next to its `actionType` so that a
/// job written by an older worker still decodes; [`StepJob::action_config`]
/// does the typed check at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepJob {
    pub schema_version: u32,
    pub workspace_id: WorkspaceId,
    pub workflow_run_id: String,
    pub action_id: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub trigger_payload: Payload,
}

impl StepJob {
    pub fn for_step(step: &WorkflowStepRun, action: &Action, trigger_payload: &Payload) -> Self {
        Self {
            schema_version: STEP_JOB_SCHEMA_VERSION,
            workspace_id: step.workspace_id.clone(),
            workflow_run_id: step.workflow_run_id.clone(),
            action_id: action.id.clone(),
            action_type: action.action_type(),
            config: action.config.config_value(),
            trigger_payload: trigger_payload.clone(),
        }
    }

    /// Queue id of the job; equal to the step's idempotency key.
    pub fn job_id(&self) -> String {
        idempotency_key(&self.workflow_run_id, &self.action_id)
    }

    pub fn action_config(&self) -> Result<ActionConfig, serde_json::Error> {
        ActionConfig::from_parts(self.action_type, self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_form() {
        let job: StepJob = serde_json::from_value(json!({
            "schemaVersion": 1,
            "workspaceId": "W1",
            "workflowRunId": "run-1",
            "actionId": "a1",
            "actionType": "send_sms",
            "config": { "text": "Hi {{firstName}}" },
            "triggerPayload": { "contactId": "C1" }
        }))
        .unwrap();

        assert_eq!(job.job_id(), "run-1:a1");
        assert_eq!(job.trigger_payload["contactId"], json!("C1"));
        match job.action_config().unwrap() {
            ActionConfig::SendSms(cfg) => assert_eq!(cfg.template(), "Hi {{firstName}}"),
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn rejects_blank_workspace() {
        let result: Result<StepJob, _> = serde_json::from_value(json!({
            "schemaVersion": 1,
            "workspaceId": "  ",
            "workflowRunId": "run-1",
            "actionId": "a1",
            "actionType": "wait"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_defaults_for_wait() {
        let job: StepJob = serde_json::from_value(json!({
            "schemaVersion": 1,
            "workspaceId": "W1",
            "workflowRunId": "run-1",
            "actionId": "a1",
            "actionType": "wait"
        }))
        .unwrap();
        assert!(matches!(job.action_config().unwrap(), ActionConfig::Wait(_)));
    }
}
