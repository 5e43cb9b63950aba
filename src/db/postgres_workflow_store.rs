use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::db::audit_repository::AuditRepository;
use crate::db::automation_repository::{AutomationRepository, TriggeredAutomations};
use crate::db::crm_repository::CrmRepository;
use crate::db::run_repository::RunRepository;
use crate::db::StoreError;
use crate::models::activity::{Activity, NewActivity};
use crate::models::audit_log::{AutomationAuditLog, NewAuditLog};
use crate::models::automation::{Action, ActionConfig, ActionType, Automation, NewAutomation, Trigger};
use crate::models::contact::Contact;
use crate::models::event::{Payload, TriggerType};
use crate::models::message::{Channel, Message, MessageThread, NewMessage};
use crate::models::workflow_run::{NewWorkflowRun, WorkflowRun};
use crate::models::workflow_step_run::{idempotency_key, WorkflowStepRun};
use crate::models::workspace::{TenantScopeViolation, WorkspaceId};

pub struct PostgresWorkflowStore {
    pub pool: PgPool,
}

impl PostgresWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AutomationRow {
    id: String,
    workspace_id: String,
    name: String,
    enabled: bool,
}

#[derive(Debug, FromRow)]
struct TriggerRow {
    id: String,
    automation_id: String,
    trigger_type: String,
    config: Value,
}

#[derive(Debug, FromRow)]
struct ActionRow {
    id: String,
    workspace_id: String,
    automation_id: String,
    action_type: String,
    position: i32,
    config: Value,
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    workspace_id: String,
    automation_id: String,
    trigger_event: String,
    trigger_payload: Value,
    status: String,
    created_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, FromRow)]
struct StepRow {
    id: String,
    workspace_id: String,
    workflow_run_id: String,
    action_id: String,
    idempotency_key: String,
    status: String,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
    output: Option<Value>,
    created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: String,
    workspace_id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: String,
    workspace_id: String,
    contact_id: Option<String>,
    activity_type: String,
    body: String,
    status: String,
    created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct ThreadRow {
    id: String,
    workspace_id: String,
    contact_id: String,
    channel: String,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    workspace_id: String,
    thread_id: String,
    channel: String,
    direction: String,
    status: String,
    body: String,
    provider_id: Option<String>,
    created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: String,
    workspace_id: String,
    automation_id: String,
    event: String,
    payload: Value,
    created_at: OffsetDateTime,
}

const RUN_COLUMNS: &str = "id, workspace_id, automation_id, trigger_event, trigger_payload, status, created_at, completed_at";
const STEP_COLUMNS: &str = "id, workspace_id, workflow_run_id, action_id, idempotency_key, status, started_at, completed_at, output, created_at";
const ACTION_COLUMNS: &str =
    r#"id, workspace_id, automation_id, type AS action_type, "order" AS position, config"#;

fn workspace(raw: String, entity: &'static str, id: &str) -> Result<WorkspaceId, StoreError> {
    WorkspaceId::parse(raw).map_err(|e| StoreError::corrupt(entity, id, e))
}

fn payload_from(value: Value, entity: &'static str, id: &str) -> Result<Payload, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Payload::new()),
        other => Err(StoreError::corrupt(
            entity,
            id,
            format!("expected an object payload, found {other}"),
        )),
    }
}

impl TryFrom<ActionRow> for Action {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        let action_type: ActionType = row
            .action_type
            .parse()
            .map_err(|e: String| StoreError::corrupt("action", &row.id, e))?;
        let config = ActionConfig::from_parts(action_type, row.config)
            .map_err(|e| StoreError::corrupt("action", &row.id, e))?;
        Ok(Action {
            workspace_id: workspace(row.workspace_id, "action", &row.id)?,
            id: row.id,
            automation_id: row.automation_id,
            order: row.position,
            config,
        })
    }
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(WorkflowRun {
            workspace_id: workspace(row.workspace_id, "workflow run", &row.id)?,
            trigger_event: row
                .trigger_event
                .parse()
                .map_err(|e: String| StoreError::corrupt("workflow run", &row.id, e))?,
            trigger_payload: payload_from(row.trigger_payload, "workflow run", &row.id)?,
            status: row
                .status
                .parse()
                .map_err(|e: String| StoreError::corrupt("workflow run", &row.id, e))?,
            id: row.id,
            automation_id: row.automation_id,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

impl TryFrom<StepRow> for WorkflowStepRun {
    type Error = StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(WorkflowStepRun {
            workspace_id: workspace(row.workspace_id, "workflow step run", &row.id)?,
            status: row
                .status
                .parse()
                .map_err(|e: String| StoreError::corrupt("workflow step run", &row.id, e))?,
            id: row.id,
            workflow_run_id: row.workflow_run_id,
            action_id: row.action_id,
            idempotency_key: row.idempotency_key,
            started_at: row.started_at,
            completed_at: row.completed_at,
            output: row.output,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ContactRow> for Contact {
    type Error = StoreError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        Ok(Contact {
            workspace_id: workspace(row.workspace_id, "contact", &row.id)?,
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
        })
    }
}

impl TryFrom<ActivityRow> for Activity {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(Activity {
            workspace_id: workspace(row.workspace_id, "activity", &row.id)?,
            activity_type: row
                .activity_type
                .parse()
                .map_err(|e: String| StoreError::corrupt("activity", &row.id, e))?,
            id: row.id,
            contact_id: row.contact_id,
            body: row.body,
            status: row.status,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ThreadRow> for MessageThread {
    type Error = StoreError;

    fn try_from(row: ThreadRow) -> Result<Self, Self::Error> {
        Ok(MessageThread {
            workspace_id: workspace(row.workspace_id, "message thread", &row.id)?,
            channel: row
                .channel
                .parse()
                .map_err(|e: String| StoreError::corrupt("message thread", &row.id, e))?,
            id: row.id,
            contact_id: row.contact_id,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            workspace_id: workspace(row.workspace_id, "message", &row.id)?,
            channel: row
                .channel
                .parse()
                .map_err(|e: String| StoreError::corrupt("message", &row.id, e))?,
            direction: row
                .direction
                .parse()
                .map_err(|e: String| StoreError::corrupt("message", &row.id, e))?,
            id: row.id,
            thread_id: row.thread_id,
            status: row.status,
            body: row.body,
            provider_id: row.provider_id,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<AuditRow> for AutomationAuditLog {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AutomationAuditLog {
            workspace_id: workspace(row.workspace_id, "audit log", &row.id)?,
            id: row.id,
            automation_id: row.automation_id,
            event: row.event,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

impl PostgresWorkflowStore {
    /// Attaches triggers and actions to `rows`. A row that fails to decode
    /// only takes its own automation out of the result.
    async fn load_automations(
        &self,
        workspace_id: &WorkspaceId,
        rows: Vec<AutomationRow>,
    ) -> Result<TriggeredAutomations, StoreError> {
        if rows.is_empty() {
            return Ok(TriggeredAutomations::default());
        }
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

        let trigger_rows = sqlx::query_as::<_, TriggerRow>(
            r#"
            SELECT id, automation_id, type AS trigger_type, config
            FROM triggers
            WHERE workspace_id = $1 AND automation_id = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(workspace_id.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let action_rows = sqlx::query_as::<_, ActionRow>(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM actions
            WHERE workspace_id = $1 AND automation_id = ANY($2)
            ORDER BY "order" ASC, created_at ASC
            "#
        ))
        .bind(workspace_id.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut broken: HashMap<String, StoreError> = HashMap::new();

        let mut triggers: HashMap<String, Vec<Trigger>> = HashMap::new();
        for row in trigger_rows {
            match row.trigger_type.parse::<TriggerType>() {
                Ok(trigger_type) => triggers.entry(row.automation_id).or_default().push(Trigger {
                    id: row.id,
                    trigger_type,
                    config: row.config,
                }),
                Err(e) => {
                    broken
                        .entry(row.automation_id)
                        .or_insert_with(|| StoreError::corrupt("trigger", &row.id, e));
                }
            }
        }

        let mut actions: HashMap<String, Vec<Action>> = HashMap::new();
        for row in action_rows {
            let automation_id = row.automation_id.clone();
            match Action::try_from(row) {
                Ok(action) => actions.entry(automation_id).or_default().push(action),
                Err(err) => {
                    broken.entry(automation_id).or_insert(err);
                }
            }
        }

        let mut found = TriggeredAutomations::default();
        for row in rows {
            if let Some(err) = broken.remove(&row.id) {
                error!(automation_id = %row.id, %err, "skipping unreadable automation");
                found.unreadable.push((row.id, err));
                continue;
            }
            match workspace(row.workspace_id, "automation", &row.id) {
                Ok(ws) => found.automations.push(Automation {
                    workspace_id: ws,
                    triggers: triggers.remove(&row.id).unwrap_or_default(),
                    actions: actions.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    name: row.name,
                    enabled: row.enabled,
                }),
                Err(err) => {
                    error!(automation_id = %row.id, %err, "skipping unreadable automation");
                    found.unreadable.push((row.id, err));
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl AutomationRepository for PostgresWorkflowStore {
    async fn create_automation(&self, automation: NewAutomation) -> Result<Automation, StoreError> {
        automation.validate()?;

        let mut tx = self.pool.begin().await?;
        let ws = automation.workspace_id.as_str();
        let automation_id = Uuid::new_v4().to_string();

        let row = sqlx::query_as::<_, AutomationRow>(
            r#"
            INSERT INTO automations (id, workspace_id, name, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, now(), now())
            RETURNING id, workspace_id, name, enabled
            "#,
        )
        .bind(&automation_id)
        .bind(ws)
        .bind(&automation.name)
        .bind(automation.enabled)
        .fetch_one(&mut *tx)
        .await?;

        let trigger_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO triggers (id, workspace_id, automation_id, type, config, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(&trigger_id)
        .bind(ws)
        .bind(&automation_id)
        .bind(automation.trigger.trigger_type.as_str())
        .bind(&automation.trigger.config)
        .execute(&mut *tx)
        .await?;

        let mut actions = Vec::with_capacity(automation.actions.len());
        for action in &automation.actions {
            let action_row = sqlx::query_as::<_, ActionRow>(&format!(
                r#"
                INSERT INTO actions (id, workspace_id, automation_id, type, "order", config, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, now())
                RETURNING {ACTION_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4().to_string())
            .bind(ws)
            .bind(&automation_id)
            .bind(action.config.action_type().as_str())
            .bind(action.order)
            .bind(action.config.config_value())
            .fetch_one(&mut *tx)
            .await?;
            actions.push(Action::try_from(action_row)?);
        }

        tx.commit().await?;

        Ok(Automation {
            id: row.id,
            workspace_id: automation.workspace_id.clone(),
            name: row.name,
            enabled: row.enabled,
            triggers: vec![Trigger {
                id: trigger_id,
                trigger_type: automation.trigger.trigger_type,
                config: automation.trigger.config,
            }],
            actions,
        })
    }

    async fn set_automation_enabled(
        &self,
        workspace_id: &WorkspaceId,
        automation_id: &str,
        enabled: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE automations
            SET enabled = $3, updated_at = now()
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(automation_id)
        .bind(workspace_id.as_str())
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_triggered_automations(
        &self,
        workspace_id: &WorkspaceId,
        trigger_type: TriggerType,
    ) -> Result<TriggeredAutomations, StoreError> {
        let rows = sqlx::query_as::<_, AutomationRow>(
            r#"
            SELECT a.id, a.workspace_id, a.name, a.enabled
            FROM automations a
            WHERE a.workspace_id = $1
              AND a.enabled = true
              AND EXISTS (
                SELECT 1 FROM triggers t
                WHERE t.automation_id = a.id
                  AND t.workspace_id = $1
                  AND t.type = $2
              )
            ORDER BY a.created_at ASC
            "#,
        )
        .bind(workspace_id.as_str())
        .bind(trigger_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.load_automations(workspace_id, rows).await
    }

    async fn find_action(
        &self,
        workspace_id: &WorkspaceId,
        action_id: &str,
    ) -> Result<Option<Action>, StoreError> {
        let row = sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions WHERE id = $1 AND workspace_id = $2"
        ))
        .bind(action_id)
        .bind(workspace_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Action::try_from).transpose()
    }
}

#[async_trait]
impl RunRepository for PostgresWorkflowStore {
    async fn create_run_with_steps(
        &self,
        run: NewWorkflowRun,
        action_ids: &[String],
    ) -> Result<(WorkflowRun, Vec<WorkflowStepRun>), StoreError> {
        let mut tx = self.pool.begin().await?;
        let ws = run.workspace_id.as_str();

        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO workflow_runs (id, workspace_id, automation_id, trigger_event, trigger_payload, status, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, 'queued', now(), now()
            WHERE EXISTS (SELECT 1 FROM automations WHERE id = $3 AND workspace_id = $2)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(ws)
        .bind(&run.automation_id)
        .bind(run.trigger_event.as_str())
        .bind(Value::Object(run.trigger_payload.clone()))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(TenantScopeViolation(format!(
                "automation {} is not owned by workspace {}",
                run.automation_id, run.workspace_id
            ))
            .into());
        };
        let created = WorkflowRun::try_from(row)?;

        let mut steps = Vec::with_capacity(action_ids.len());
        for action_id in action_ids {
            let step_row = sqlx::query_as::<_, StepRow>(&format!(
                r#"
                INSERT INTO workflow_step_runs (id, workspace_id, workflow_run_id, action_id, idempotency_key, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 'QUEUED', now(), now())
                RETURNING {STEP_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4().to_string())
            .bind(ws)
            .bind(&created.id)
            .bind(action_id)
            .bind(idempotency_key(&created.id, action_id))
            .fetch_one(&mut *tx)
            .await?;
            steps.push(WorkflowStepRun::try_from(step_row)?);
        }

        tx.commit().await?;
        Ok((created, steps))
    }

    async fn find_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
    ) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1 AND workspace_id = $2"
        ))
        .bind(run_id)
        .bind(workspace_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowRun::try_from).transpose()
    }

    async fn find_step_run(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
        action_id: &str,
    ) -> Result<Option<WorkflowStepRun>, StoreError> {
        let row = sqlx::query_as::<_, StepRow>(&format!(
            r#"
            SELECT {STEP_COLUMNS}
            FROM workflow_step_runs
            WHERE workspace_id = $1 AND workflow_run_id = $2 AND action_id = $3
            "#
        ))
        .bind(workspace_id.as_str())
        .bind(run_id)
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowStepRun::try_from).transpose()
    }

    async fn try_start_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> Result<Option<WorkflowStepRun>, StoreError> {
        let row = sqlx::query_as::<_, StepRow>(&format!(
            r#"
            UPDATE workflow_step_runs
            SET status = 'RUNNING', started_at = $3, updated_at = now()
            WHERE id = $1
              AND workspace_id = $2
              AND (
                status = 'QUEUED'
                OR (status = 'RUNNING' AND (started_at IS NULL OR started_at < $4))
              )
            RETURNING {STEP_COLUMNS}
            "#
        ))
        .bind(step_id)
        .bind(workspace_id.as_str())
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowStepRun::try_from).transpose()
    }

    async fn complete_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
        output: Value,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflow_step_runs
            SET status = 'COMPLETED', completed_at = $3, output = $4, updated_at = now()
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(step_id)
        .bind(workspace_id.as_str())
        .bind(now)
        .bind(output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_step(
        &self,
        workspace_id: &WorkspaceId,
        step_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflow_step_runs
            SET status = 'QUEUED', updated_at = now()
            WHERE id = $1 AND workspace_id = $2 AND status = 'RUNNING'
            "#,
        )
        .bind(step_id)
        .bind(workspace_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_run_running(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'running', updated_at = now()
            WHERE id = $1 AND workspace_id = $2 AND status = 'queued'
            "#,
        )
        .bind(run_id)
        .bind(workspace_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_run_if_finished(
        &self,
        workspace_id: &WorkspaceId,
        run_id: &str,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs r
            SET status = 'completed', completed_at = $3, updated_at = now()
            WHERE r.id = $1
              AND r.workspace_id = $2
              AND r.status <> 'completed'
              AND NOT EXISTS (
                SELECT 1 FROM workflow_step_runs s
                WHERE s.workflow_run_id = r.id
                  AND s.workspace_id = $2
                  AND s.status <> 'COMPLETED'
              )
            "#,
        )
        .bind(run_id)
        .bind(workspace_id.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CrmRepository for PostgresWorkflowStore {
    async fn find_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact_id: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT id, workspace_id, first_name, last_name, email, phone
            FROM contacts
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(contact_id)
        .bind(workspace_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Contact::try_from).transpose()
    }

    async fn insert_activity(&self, activity: NewActivity) -> Result<Activity, StoreError> {
        let row = sqlx::query_as::<_, ActivityRow>(
            r#"
            INSERT INTO activities (id, workspace_id, contact_id, type, body, status, created_at)
            SELECT $1, $2, $3, $4, $5, $6, now()
            WHERE $3::text IS NULL
               OR EXISTS (SELECT 1 FROM contacts WHERE id = $3 AND workspace_id = $2)
            RETURNING id, workspace_id, contact_id, type AS activity_type, body, status, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(activity.workspace_id.as_str())
        .bind(activity.contact_id.as_deref())
        .bind(activity.activity_type.as_str())
        .bind(&activity.body)
        .bind(&activity.status)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Activity::try_from(row),
            None => Err(TenantScopeViolation(format!(
                "contact {} is not visible to workspace {}",
                activity.contact_id.as_deref().unwrap_or_default(),
                activity.workspace_id
            ))
            .into()),
        }
    }

    async fn move_opportunity_stage(
        &self,
        workspace_id: &WorkspaceId,
        opportunity_id: &str,
        stage_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE opportunities
            SET stage_id = $3, updated_at = now()
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(opportunity_id)
        .bind(workspace_id.as_str())
        .bind(stage_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_or_create_thread(
        &self,
        workspace_id: &WorkspaceId,
        contact_id: &str,
        channel: Channel,
    ) -> Result<MessageThread, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            INSERT INTO message_threads (id, workspace_id, contact_id, channel, created_at)
            SELECT $1, $2, $3, $4, now()
            WHERE EXISTS (SELECT 1 FROM contacts WHERE id = $3 AND workspace_id = $2)
            ON CONFLICT (workspace_id, contact_id, channel)
            DO UPDATE SET channel = EXCLUDED.channel
            RETURNING id, workspace_id, contact_id, channel
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workspace_id.as_str())
        .bind(contact_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => MessageThread::try_from(row),
            None => Err(TenantScopeViolation(format!(
                "contact {contact_id} is not visible to workspace {workspace_id}"
            ))
            .into()),
        }
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, workspace_id, thread_id, channel, direction, status, body, provider_id, created_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, now()
            WHERE EXISTS (SELECT 1 FROM message_threads WHERE id = $3 AND workspace_id = $2)
            RETURNING id, workspace_id, thread_id, channel, direction, status, body, provider_id, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(message.workspace_id.as_str())
        .bind(&message.thread_id)
        .bind(message.channel.as_str())
        .bind(message.direction.as_str())
        .bind(&message.status)
        .bind(&message.body)
        .bind(message.provider_id.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Message::try_from(row),
            None => Err(TenantScopeViolation(format!(
                "message thread {} is not visible to workspace {}",
                message.thread_id, message.workspace_id
            ))
            .into()),
        }
    }
}

#[async_trait]
impl AuditRepository for PostgresWorkflowStore {
    async fn insert_audit_log(&self, entry: NewAuditLog) -> Result<AutomationAuditLog, StoreError> {
        let row = sqlx::query_as::<_, AuditRow>(
            r#"
            INSERT INTO automation_audit_logs (id, workspace_id, automation_id, event, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING id, workspace_id, automation_id, event, payload, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entry.workspace_id.as_str())
        .bind(&entry.automation_id)
        .bind(&entry.event)
        .bind(&entry.payload)
        .fetch_one(&self.pool)
        .await?;
        AutomationAuditLog::try_from(row)
    }
}
