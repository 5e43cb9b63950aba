use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::audit_repository::AuditRepository;
use crate::db::automation_repository::{AutomationRepository, TriggeredAutomations};
use crate::db::crm_repository::CrmRepository;
use crate::db::run_repository::RunRepository;
use crate::db::StoreError;
use crate::models::activity::{Activity, NewActivity};
use crate::models::audit_log::{AutomationAuditLog, NewAuditLog};
use crate::models::automation::{Action, Automation, NewAutomation, Trigger};
use crate::models::contact::Contact;
use crate::models::event::TriggerType;
use crate::models::message::{Channel, Message, MessageThread, NewMessage};
use crate::models::opportunity::Opportunity;
use crate::models::workflow_run::{NewWorkflowRun, RunStatus, WorkflowRun};
use crate::models::workflow_step_run::{idempotency_key, StepStatus, WorkflowStepRun};
use crate::models::workspace::{ensure_same_workspace, TenantScopeViolation, WorkspaceId};

/// Process-local storage gateway. Every lookup filters on the workspace the
/// same way the Postgres store does, so tenant isolation can be exercised
/// without a database.
#[derive(Default)]
pub struct MemoryStore {
    automations: Mutex<Vec<Automation>>,
    runs: Mutex<Vec<WorkflowRun>>,
    steps: Mutex<Vec<WorkflowStepRun>>,
    audit_logs: Mutex<Vec<AutomationAuditLog>>,
    contacts: Mutex<Vec<Contact>>,
    opportunities: Mutex<Vec<Opportunity>>,
    activities: Mutex<Vec<Activity>>,
    threads: Mutex<Vec<MessageThread>>,
    messages: Mutex<Vec<Message>>,
    failing_run_creation: Mutex<HashSet<String>>,
    unreadable: Mutex<HashSet<String>>,
    fail_audit: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_contact(&self, contact: Contact) {
        lock(&self.contacts).push(contact);
    }

    pub fn insert_opportunity(&self, opportunity: Opportunity) {
        lock(&self.opportunities).push(opportunity);
    }

    /// Makes `create_run_with_steps` fail for one automation.
    pub fn fail_run_creation_for(&self, automation_id: &str) {
        lock(&self.failing_run_creation).insert(automation_id.to_string());
    }

    /// Makes trigger lookups report one automation as undecodable.
    pub fn mark_unreadable(&self, automation_id: &str) {
        lock(&self.unreadable).insert(automation_id.to_string());
    }

    pub fn set_audit_failure(&self, fail: bool) {
        *lock(&self.fail_audit) = fail;
    }

    pub fn runs(&self) -> Vec<WorkflowRun> {
        lock(&self.runs).clone()
    }

    pub fn step_runs(&self) -> Vec<WorkflowStepRun> {
        lock(&self.steps).clone()
    }

    pub fn audit_logs(&self) -> Vec<AutomationAuditLog> {
        lock(&self.audit_logs).clone()
    }

    pub fn activities(&self) -> Vec<Activity> {
        lock(&self.activities).clone()
    }

    pub fn threads(&self) -> Vec<MessageThread> {
        lock(&self.threads).clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    pub fn opportunity(&self, workspace_id: &WorkspaceId, opportunity_id: &str) -> Option<Opportunity> {
        lock(&self.opportunities)
            .iter()
            .find(|o| o.id == opportunity_id && &o.workspace_id == workspace_id)
            .cloned()
    }

    fn contact_in_workspace(&self, workspace_id: &WorkspaceId, contact_id: &str) -> bool {
        lock(&self.contacts)
            .iter()
            .any(|c| c.id == contact_id && &c.workspace_id == workspace_id)
    }
}

#[async_trait]
impl AutomationRepository for MemoryStore {
    async fn create_automation(&self, automation: NewAutomation) -> Result<Automation, StoreError> {
        automation.validate()?;

        let automation_id = new_id();
        let actions = automation
            .actions
            .into_iter()
            .map(|action| Action {
                id: new_id(),
                workspace_id: automation.workspace_id.clone(),
                automation_id: automation_id.clone(),
                order: action.order,
                config: action.config,
            })
            .collect();
        let created = Automation {
            id: automation_id,
            workspace_id: automation.workspace_id,
            name: automation.name,
            enabled: automation.enabled,
            triggers: vec![Trigger {
                id: new_id(),
                trigger_type: automation.trigger.trigger_type,
                config: automation.trigger.config,
            }],
            actions,
        };
        lock(&self.automations).push(created.clone());
        Ok(created)
    }

    async fn set_automation_enabled(
        &self,
        workspace_id: &WorkspaceId,
        automation_id: &str,
        enabled: bool,
    ) -> Result<bool, StoreError> {
        let mut automations = lock(&self.automations);
        match automations
            .iter_mut()
            .find(|a| a.id == automation_id && &a.workspace_id == workspace_id)
        {
            Some(automation) => {
                automation.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_triggered_automations(
        &self,
        workspace_id: &WorkspaceId,
        trigger_type: TriggerType,
    ) -> Result<TriggeredAutomations, StoreError> {
        let unreadable = lock(&self.unreadable).clone();
        let mut found = TriggeredAutomations::default();
        for automation in lock(&self.automations)
            .iter()
            .filter(|a| &a.workspace_id == workspace_id)
            .filter(|a| a.enabled && a.is_triggered_by(trigger_type))
        {
            if unreadable.contains(&automation.id) {
                found.unreadable.push((
                    automation.id.clone(),
                    StoreError::corrupt(
                        "automation",
                        &automation.id,
                        "stored config is unreadable",
                    ),
                ));
            } else {
                found.automations.push(automation.clone());
            }
        }
        Ok(found)
    }

    async fn find_action(
        &self,
        workspace_id: &WorkspaceId,
        action_id: &str,
    ) -> Result<Option<Action>, StoreError> {
        Ok(lock(&self.automations)
            .iter()
            .flat_map(|a| a.actions.iter())
            .find(|a| a.id == action_id && &a.workspace_id == workspace_id)
            .cloned())
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn create_run_with_steps(
        &self,
        run: NewWorkflowRun,
        action_ids: &[String],
    ) -> Result<(WorkflowRun, Vec<WorkflowStepRun>), StoreError> {
        if lock(&self.failing_run_creation).contains(&run.automation_id) {
            return Err(StoreError::Unavailable(format!(
                "run creation disabled for automation {}",
                run.automation_id
            )));
        }
        let owned = lock(&self.automations)
            .iter()
            .any(|a| a.id == run.automation_id && a.workspace_id == run.workspace_id);
        if !owned {
            return Err(TenantScopeViolation(format!(
                "automation {} is not owned by workspace {}",
                run.automation_id, run.workspace_id
            ))
            .into());
        }

        let now = OffsetDateTime::now_utc();
        let created = WorkflowRun {
            id: new_id(),
            workspace_id: run.workspace_id,
            automation_id: run.automation_id,
            trigger_event: run.trigger_event,
            trigger_payload: run.trigger_payload,
            status: RunStatus::Queued,
            created_at: now,
            completed_at: None,
        };
        let steps: Vec<WorkflowStepRun> = action_ids
            .iter()
            .map(|action_id| WorkflowStepRun {
                id: new_id(),
                workspace_id: created.workspace_id.clone(),
                workflow_run_id: created.id.clone(),
                action_id: action_id.clone(),
                idempotency_key: idempotency_key(&created.id, action_id),
                status: StepStatus::Queued,
                started_at: None,
                completed_at: None,
                output: None,
                created_at: now,
            })
            .collect();

        lock(&self.runs).push(created.clone());
        lock(&self.steps).extend(steps.iter().cloned());
        Ok((created, steps))
    }

    async fn find_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
    ) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(lock(&self.runs)
            .iter()
            .find(|r| r.id == run_id && &r.workspace_id == workspace_id)
            .cloned())
    }

    async fn find_step_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
        action_id: &str,
    ) -> Result<Option<WorkflowStepRun>, StoreError> {
        Ok(lock(&self.steps)
            .iter()
            .find(|s| {
                &s.workspace_id == workspace_id
                    && s.workflow_run_id == run_id
                    && s.action_id == action_id
            })
            .cloned())
    }

    async fn try_start_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<Option<WorkflowStepRun>, StoreError> {
        let mut steps = lock(&self.steps);
        let Some(step) = steps
            .iter_mut()
            .find(|s| s.id == step_id && &s.workspace_id == workspace_id)
        else {
            return Ok(None);
        };
        let claimable = match step.status {
            StepStatus::Queued => true,
            StepStatus::Running => step.started_at.map_or(true, |t| t < stale_before),
            StepStatus::Completed => false,
        };
        if !claimable {
            return Ok(None);
        }
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        Ok(Some(step.clone()))
    }

    async fn complete_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
        output: Value,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut steps = lock(&self.steps);
        if let Some(step) = steps
            .iter_mut()
            .find(|s| s.id == step_id && &s.workspace_id == workspace_id)
        {
            step.status = StepStatus::Completed;
            step.completed_at = Some(now);
            step.output = Some(output);
        }
        Ok(())
    }

    async fn release_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
    ) -> Result<(), StoreError> {
        let mut steps = lock(&self.steps);
        if let Some(step) = steps.iter_mut().find(|s| {
            s.id == step_id && &s.workspace_id == workspace_id && s.status == StepStatus::Running
        }) {
            step.status = StepStatus::Queued;
        }
        Ok(())
    }

    async fn mark_run_running(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
    ) -> Result<(), StoreError> {
        let mut runs = lock(&self.runs);
        if let Some(run) = runs.iter_mut().find(|r| {
            r.id == run_id && &r.workspace_id == workspace_id && r.status == RunStatus::Queued
        }) {
            run.status = RunStatus::Running;
        }
        Ok(())
    }

    async fn complete_run_if_finished(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let outstanding = lock(&self.steps).iter().any(|s| {
            &s.workspace_id == workspace_id
                && s.workflow_run_id == run_id
                && s.status != StepStatus::Completed
        });
        if outstanding {
            return Ok(false);
        }
        let mut runs = lock(&self.runs);
        match runs.iter_mut().find(|r| {
            r.id == run_id && &r.workspace_id == workspace_id && r.status != RunStatus::Completed
        }) {
            Some(run) => {
                run.status = RunStatus::Completed;
                run.completed_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CrmRepository for MemoryStore {
    async fn find_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact_id: &str,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(lock(&self.contacts)
            .iter()
            .find(|c| c.id == contact_id && &c.workspace_id == workspace_id)
            .cloned())
    }

    async fn insert_activity(&self, activity: NewActivity) -> Result<Activity, StoreError> {
        if let Some(contact_id) = activity.contact_id.as_deref() {
            if !self.contact_in_workspace(&activity.workspace_id, contact_id) {
                return Err(TenantScopeViolation(format!(
                    "contact {contact_id} is not visible to workspace {}",
                    activity.workspace_id
                ))
                .into());
            }
        }
        let created = Activity {
            id: new_id(),
            workspace_id: activity.workspace_id,
            contact_id: activity.contact_id,
            activity_type: activity.activity_type,
            body: activity.body,
            status: activity.status,
            created_at: OffsetDateTime::now_utc(),
        };
        lock(&self.activities).push(created.clone());
        Ok(created)
    }

    async fn move_opportunity_stage(
        &self,
        workspace_id: &WorkspaceId,
        opportunity_id: &str,
        stage_id: &str,
    ) -> Result<bool, StoreError> {
        let mut opportunities = lock(&self.opportunities);
        match opportunities
            .iter_mut()
            .find(|o| o.id == opportunity_id && &o.workspace_id == workspace_id)
        {
            Some(opportunity) => {
                opportunity.stage_id = stage_id.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_or_create_thread(
        &self,
        workspace_id: &WorkspaceId,
        contact_id: &str,
        channel: Channel,
    ) -> Result<MessageThread, StoreError> {
        if !self.contact_in_workspace(workspace_id, contact_id) {
            return Err(TenantScopeViolation(format!(
                "contact {contact_id} is not visible to workspace {workspace_id}"
            ))
            .into());
        }
        let mut threads = lock(&self.threads);
        if let Some(thread) = threads.iter().find(|t| {
            &t.workspace_id == workspace_id && t.contact_id == contact_id && t.channel == channel
        }) {
            return Ok(thread.clone());
        }
        let thread = MessageThread {
            id: new_id(),
            workspace_id: workspace_id.clone(),
            contact_id: contact_id.to_string(),
            channel,
        };
        threads.push(thread.clone());
        Ok(thread)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let thread_owner = lock(&self.threads)
            .iter()
            .find(|t| t.id == message.thread_id)
            .map(|t| t.workspace_id.clone());
        match thread_owner {
            Some(owner) => ensure_same_workspace(&message.workspace_id, &owner, "message thread")?,
            None => {
                return Err(TenantScopeViolation(format!(
                    "message thread {} does not exist",
                    message.thread_id
                ))
                .into())
            }
        }
        let created = Message {
            id: new_id(),
            workspace_id: message.workspace_id,
            thread_id: message.thread_id,
            channel: message.channel,
            direction: message.direction,
            status: message.status,
            body: message.body,
            provider_id: message.provider_id,
            created_at: OffsetDateTime::now_utc(),
        };
        lock(&self.messages).push(created.clone());
        Ok(created)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn insert_audit_log(&self, entry: NewAuditLog) -> Result<AutomationAuditLog, StoreError> {
        if *lock(&self.fail_audit) {
            return Err(StoreError::Unavailable("audit log rejected write".into()));
        }
        let created = AutomationAuditLog {
            id: new_id(),
            workspace_id: entry.workspace_id,
            automation_id: entry.automation_id,
            event: entry.event,
            payload: entry.payload,
            created_at: OffsetDateTime::now_utc(),
        };
        lock(&self.audit_logs).push(created.clone());
        Ok(created)
    }
}
