use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::db::StoreError;
use crate::models::workflow_run::{NewWorkflowRun, WorkflowRun};
use crate::models::workflow_step_run::WorkflowStepRun;
use crate::models::workspace::WorkspaceId;

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Creates the run and one QUEUED step per action id, in the given order,
    /// as a single unit. Fails with a tenant violation when the automation is
    /// not owned by the run's workspace.
    async fn create_run_with_steps(
        &self,
        run: NewWorkflowRun,
        action_ids: &[String],
    ) -> Result<(WorkflowRun, Vec<WorkflowStepRun>), StoreError>;

    async fn find_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
    ) -> Result<Option<WorkflowRun>, StoreError>;

    async fn find_step_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
        action_id: &str,
    ) -> Result<Option<WorkflowStepRun>, StoreError>;

    /// Compare-and-swap into RUNNING. Succeeds from QUEUED, or from RUNNING
    /// when the previous start is older than `stale_before`. Returns `None`
    /// when another worker holds the step or it already completed.
    async fn try_start_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<Option<WorkflowStepRun>, StoreError>;

    async fn complete_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
        output: Value,
        now: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Puts a RUNNING step back to QUEUED after a failed attempt.
    async fn release_step(&self, workspace_id: &WorkspaceId, step_id: &str)
        -> Result<(), StoreError>;

    async fn mark_run_running(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
    ) -> Result<(), StoreError>;

    /// Marks the run completed once none of its steps is outstanding.
    /// Returns true only for the call that performed the transition.
    async fn complete_run_if_finished(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError>;
}
