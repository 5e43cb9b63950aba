use serde_json::Value;
use tracing::{debug, error, info};

use crate::engine::audit::WORKFLOW_QUEUED;
use crate::engine::error::EngineError;
use crate::engine::scheduler::schedule_step;
use crate::models::automation::Automation;
use crate::models::event::DomainEvent;
use crate::models::workflow_run::{NewWorkflowRun, WorkflowRun};
use crate::models::workflow_step_run::WorkflowStepRun;
use crate::state::EngineState;

#[derive(Debug)]
pub struct MaterializedRun {
    pub run: WorkflowRun,
    pub steps: Vec<WorkflowStepRun>,
}

#[derive(Debug)]
pub struct MatchFailure {
    pub automation_id: String,
    pub error: EngineError,
}

/// Result of matching one event. One automation failing does not stop the
/// others, so successes and failures are reported side by side.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub runs: Vec<MaterializedRun>,
    pub failures: Vec<MatchFailure>,
}

impl MatchReport {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty() && self.failures.is_empty()
    }

    /// The created runs, or the first failure if there was one.
    pub fn into_result(self) -> Result<Vec<MaterializedRun>, EngineError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.runs),
        }
    }
}

/// Creates a run with its steps for every enabled automation in the event's
/// workspace that has a trigger of the event's type, then schedules the steps.
pub async fn on_event(state: &EngineState, event: &DomainEvent) -> Result<MatchReport, EngineError> {
    let found = state
        .automations
        .list_triggered_automations(&event.workspace_id, event.trigger_type)
        .await?;

    let mut report = MatchReport::default();
    for (automation_id, err) in found.unreadable {
        error!(
            workspace_id = %event.workspace_id,
            %automation_id,
            trigger = %event.trigger_type,
            %err,
            "automation could not be loaded"
        );
        report.failures.push(MatchFailure {
            automation_id,
            error: err.into(),
        });
    }

    for automation in found.automations {
        if !automation.enabled
            || !automation.is_triggered_by(event.trigger_type)
            || automation.workspace_id != event.workspace_id
        {
            continue;
        }

        match materialize(state, event, &automation).await {
            Ok(run) => report.runs.push(run),
            Err(err) => {
                error!(
                    workspace_id = %event.workspace_id,
                    automation_id = %automation.id,
                    trigger = %event.trigger_type,
                    %err,
                    "failed to materialize workflow run"
                );
                report.failures.push(MatchFailure {
                    automation_id: automation.id.clone(),
                    error: err,
                });
            }
        }
    }

    if report.is_empty() {
        debug!(
            workspace_id = %event.workspace_id,
            trigger = %event.trigger_type,
            "no automation matched event"
        );
    }
    Ok(report)
}

async fn materialize(
    state: &EngineState,
    event: &DomainEvent,
    automation: &Automation,
) -> Result<MaterializedRun, EngineError> {
    let actions = automation.ordered_actions();
    let action_ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();

    let (run, steps) = state
        .runs
        .create_run_with_steps(
            NewWorkflowRun {
                workspace_id: event.workspace_id.clone(),
                automation_id: automation.id.clone(),
                trigger_event: event.trigger_type,
                trigger_payload: event.payload.clone(),
            },
            &action_ids,
        )
        .await?;

    info!(
        workspace_id = %run.workspace_id,
        workflow_run_id = %run.id,
        automation_id = %automation.id,
        steps = steps.len(),
        "workflow run queued"
    );

    state
        .audit
        .record(
            &run.workspace_id,
            &automation.id,
            WORKFLOW_QUEUED,
            Value::Object(event.payload.clone()),
        )
        .await;

    for (step, action) in steps.iter().zip(actions) {
        schedule_step(state.queue.as_ref(), step, action, &run.trigger_payload).await?;
    }

    Ok(MaterializedRun { run, steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::automation_repository::AutomationRepository;
    use crate::engine::executor::execute_step;
    use crate::models::automation::{
        ActionConfig, CreateTaskConfig, NewAction, NewAutomation, NewTrigger, SendSmsConfig,
        WaitConfig,
    };
    use crate::models::event::{Payload, TriggerType};
    use crate::models::workflow_run::RunStatus;
    use crate::models::workflow_step_run::StepStatus;
    use crate::models::workspace::WorkspaceId;
    use crate::state::test_support::test_engine;
    use serde_json::json;

    fn ws(id: &str) -> WorkspaceId {
        WorkspaceId::parse(id).unwrap()
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn automation(
        workspace: &str,
        trigger: TriggerType,
        enabled: bool,
        actions: Vec<(i32, ActionConfig)>,
    ) -> NewAutomation {
        NewAutomation {
            workspace_id: ws(workspace),
            name: "Welcome".into(),
            enabled,
            trigger: NewTrigger {
                trigger_type: trigger,
                config: json!({}),
            },
            actions: actions
                .into_iter()
                .map(|(order, config)| NewAction { order, config })
                .collect(),
        }
    }

    fn sms(text: &str) -> ActionConfig {
        ActionConfig::SendSms(SendSmsConfig {
            text: Some(text.into()),
            ..Default::default()
        })
    }

    fn task(body: &str) -> ActionConfig {
        ActionConfig::CreateTask(CreateTaskConfig {
            body: Some(body.into()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn creates_one_run_with_steps_in_action_order() {
        let engine = test_engine();
        let created = engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::ContactCreated,
                true,
                vec![(2, task("third")), (0, sms("first")), (1, task("second"))],
            ))
            .await
            .unwrap();

        let event = DomainEvent::new(
            ws("W1"),
            TriggerType::ContactCreated,
            payload(json!({ "contactId": "C1" })),
        );
        let report = on_event(&engine.state, &event).await.unwrap();
        let runs = report.into_result().unwrap();

        assert_eq!(runs.len(), 1);
        let run = &runs[0].run;
        assert_eq!(run.automation_id, created.id);
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.trigger_event, TriggerType::ContactCreated);
        assert_eq!(run.trigger_payload["contactId"], json!("C1"));

        let ordered: Vec<String> = created.ordered_actions().iter().map(|a| a.id.clone()).collect();
        let step_actions: Vec<String> = runs[0].steps.iter().map(|s| s.action_id.clone()).collect();
        assert_eq!(step_actions, ordered);
        assert!(runs[0].steps.iter().all(|s| s.status == StepStatus::Queued));

        let job_actions: Vec<String> = engine.queue.jobs().into_iter().map(|j| j.action_id).collect();
        assert_eq!(job_actions, ordered);

        let audit = engine.store.audit_logs();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].event, WORKFLOW_QUEUED);
        assert_eq!(audit[0].payload, json!({ "contactId": "C1" }));
    }

    #[tokio::test]
    async fn disabled_and_mismatched_automations_produce_nothing() {
        let engine = test_engine();
        engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::ContactCreated,
                false,
                vec![(0, task("disabled"))],
            ))
            .await
            .unwrap();
        engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::FormSubmitted,
                true,
                vec![(0, task("other trigger"))],
            ))
            .await
            .unwrap();
        engine
            .store
            .create_automation(automation(
                "W2",
                TriggerType::ContactCreated,
                true,
                vec![(0, task("other tenant"))],
            ))
            .await
            .unwrap();

        let event = DomainEvent::new(ws("W1"), TriggerType::ContactCreated, Payload::new());
        let report = on_event(&engine.state, &event).await.unwrap();

        assert!(report.is_empty());
        assert!(engine.store.runs().is_empty());
        assert!(engine.queue.is_empty());
        assert!(engine.store.audit_logs().is_empty());
    }

    #[tokio::test]
    async fn every_matching_automation_gets_its_own_run() {
        let engine = test_engine();
        for name in ["one", "two"] {
            engine
                .store
                .create_automation(automation(
                    "W1",
                    TriggerType::FormSubmitted,
                    true,
                    vec![(0, task(name))],
                ))
                .await
                .unwrap();
        }

        let event = DomainEvent::new(ws("W1"), TriggerType::FormSubmitted, Payload::new());
        let runs = on_event(&engine.state, &event)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(runs.len(), 2);
        assert_ne!(runs[0].run.automation_id, runs[1].run.automation_id);
        assert_eq!(engine.queue.len(), 2);
    }

    #[tokio::test]
    async fn one_failing_automation_does_not_block_the_others() {
        let engine = test_engine();
        let broken = engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::OpportunityStageChanged,
                true,
                vec![(0, task("broken"))],
            ))
            .await
            .unwrap();
        let healthy = engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::OpportunityStageChanged,
                true,
                vec![(0, ActionConfig::Wait(WaitConfig { delay_minutes: 5.0 }))],
            ))
            .await
            .unwrap();
        engine.store.fail_run_creation_for(&broken.id);

        let event = DomainEvent::new(ws("W1"), TriggerType::OpportunityStageChanged, Payload::new());
        let report = on_event(&engine.state, &event).await.unwrap();

        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.runs[0].run.automation_id, healthy.id);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].automation_id, broken.id);
        assert!(report.into_result().is_err());
        assert_eq!(engine.store.runs().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_automation_is_reported_and_the_rest_still_run() {
        let engine = test_engine();
        let corrupt = engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::ContactCreated,
                true,
                vec![(0, task("corrupt"))],
            ))
            .await
            .unwrap();
        let healthy = engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::ContactCreated,
                true,
                vec![(0, task("healthy"))],
            ))
            .await
            .unwrap();
        engine.store.mark_unreadable(&corrupt.id);

        let event = DomainEvent::new(ws("W1"), TriggerType::ContactCreated, Payload::new());
        let report = on_event(&engine.state, &event).await.unwrap();

        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.runs[0].run.automation_id, healthy.id);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].automation_id, corrupt.id);
        assert!(matches!(report.failures[0].error, EngineError::Store(_)));
        assert_eq!(engine.queue.len(), 1);
    }

    #[tokio::test]
    async fn disabling_stops_new_matches_but_not_scheduled_steps() {
        let engine = test_engine();
        let created = engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::FormSubmitted,
                true,
                vec![(0, task("follow up"))],
            ))
            .await
            .unwrap();
        let event = DomainEvent::new(ws("W1"), TriggerType::FormSubmitted, Payload::new());
        on_event(&engine.state, &event)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let disabled = engine
            .store
            .set_automation_enabled(&ws("W1"), &created.id, false)
            .await
            .unwrap();
        assert!(disabled);

        let job = engine.queue.jobs().remove(0);
        execute_step(&engine.state, &job).await.unwrap();
        assert_eq!(engine.store.runs()[0].status, RunStatus::Completed);
        assert_eq!(engine.store.activities().len(), 1);

        let report = on_event(&engine.state, &event).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(engine.store.runs().len(), 1);
    }

    #[tokio::test]
    async fn audit_failure_does_not_fail_materialization() {
        let engine = test_engine();
        engine
            .store
            .create_automation(automation(
                "W1",
                TriggerType::InboundSmsReceived,
                true,
                vec![(0, task("reply"))],
            ))
            .await
            .unwrap();
        engine.store.set_audit_failure(true);

        let event = DomainEvent::new(ws("W1"), TriggerType::InboundSmsReceived, Payload::new());
        let runs = on_event(&engine.state, &event)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(engine.queue.len(), 1);
        assert!(engine.store.audit_logs().is_empty());
    }
}
