use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::workspace::WorkspaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Queued,
    Running,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Queued => "QUEUED",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(StepStatus::Queued),
            "RUNNING" => Ok(StepStatus::Running),
            "COMPLETED" => Ok(StepStatus::Completed),
            other => Err(format!("unknown step status `{other}`")),
        }
    }
}

/// Stable identity of one action's execution within one run. Doubles as the
/// queue job id.
pub fn idempotency_key(workflow_run_id: &str, action_id: &str) -> String {
    format!("{workflow_run_id}:{action_id}")
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepRun {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub workflow_run_id: String,
    pub action_id: String,
    pub idempotency_key: String,
    pub status: StepStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub output: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_joins_run_and_action() {
        assert_eq!(idempotency_key("run-1", "act-9"), "run-1:act-9");
    }

    #[test]
    fn step_status_uses_upper_case_names() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!("RUNNING".parse::<StepStatus>(), Ok(StepStatus::Running));
        assert!("running".parse::<StepStatus>().is_err());
    }
}
