use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::event::TriggerType;
use super::workspace::WorkspaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendSms,
    SendEmail,
    CreateTask,
    Wait,
    MoveOpportunity,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::SendSms,
        ActionType::SendEmail,
        ActionType::CreateTask,
        ActionType::Wait,
        ActionType::MoveOpportunity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendSms => "send_sms",
            ActionType::SendEmail => "send_email",
            ActionType::CreateTask => "create_task",
            ActionType::Wait => "wait",
            ActionType::MoveOpportunity => "move_opportunity",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown action type `{s}`"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendSmsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

impl SendSmsConfig {
    /// `text` wins over `body`; older automations only set `body`.
    pub fn template(&self) -> &str {
        self.text
            .as_deref()
            .or(self.body.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendEmailConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTaskConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

impl CreateTaskConfig {
    pub const DEFAULT_BODY: &'static str = "Task created";

    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or(Self::DEFAULT_BODY)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitConfig {
    /// Accepts integers, fractions and numeric strings. Anything negative or
    /// unreadable counts as no delay.
    #[serde(
        deserialize_with = "lenient_minutes",
        serialize_with = "compact_minutes"
    )]
    pub delay_minutes: f64,
}

impl WaitConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis((self.delay_minutes * 60_000.0).round() as u64)
    }
}

fn lenient_minutes<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let minutes = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if minutes.is_finite() && minutes > 0.0 {
        minutes
    } else {
        0.0
    })
}

fn compact_minutes<S>(minutes: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if minutes.fract() == 0.0 && *minutes >= 0.0 && *minutes < u64::MAX as f64 {
        serializer.serialize_u64(*minutes as u64)
    } else {
        serializer.serialize_f64(*minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MoveOpportunityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opportunity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
}

/// Strongly typed action configuration, keyed by action type.
///
/// Stored rows and queue payloads keep the `(actionType, config)` pair as
/// separate fields; [`ActionConfig::from_parts`] is the single place where
/// the untyped map is checked against the variant's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionType", content = "config", rename_all = "snake_case")]
pub enum ActionConfig {
    SendSms(SendSmsConfig),
    SendEmail(SendEmailConfig),
    CreateTask(CreateTaskConfig),
    Wait(WaitConfig),
    MoveOpportunity(MoveOpportunityConfig),
}

impl ActionConfig {
    pub fn from_parts(action_type: ActionType, config: Value) -> Result<Self, serde_json::Error> {
        let config = if config.is_null() {
            Value::Object(Map::new())
        } else {
            config
        };
        serde_json::from_value(json!({ "actionType": action_type, "config": config }))
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            ActionConfig::SendSms(_) => ActionType::SendSms,
            ActionConfig::SendEmail(_) => ActionType::SendEmail,
            ActionConfig::CreateTask(_) => ActionType::CreateTask,
            ActionConfig::Wait(_) => ActionType::Wait,
            ActionConfig::MoveOpportunity(_) => ActionType::MoveOpportunity,
        }
    }

    /// The untyped `config` map as stored and carried on the queue.
    pub fn config_value(&self) -> Value {
        let value = match self {
            ActionConfig::SendSms(c) => serde_json::to_value(c),
            ActionConfig::SendEmail(c) => serde_json::to_value(c),
            ActionConfig::CreateTask(c) => serde_json::to_value(c),
            ActionConfig::Wait(c) => serde_json::to_value(c),
            ActionConfig::MoveOpportunity(c) => serde_json::to_value(c),
        };
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Delay to apply when the step's job is enqueued.
    pub fn schedule_delay(&self) -> Duration {
        match self {
            ActionConfig::Wait(wait) => wait.delay(),
            _ => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub id: String,
    pub trigger_type: TriggerType,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub automation_id: String,
    pub order: i32,
    pub config: ActionConfig,
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        self.config.action_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Automation {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub enabled: bool,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
}

impl Automation {
    pub fn is_triggered_by(&self, trigger_type: TriggerType) -> bool {
        self.triggers.iter().any(|t| t.trigger_type == trigger_type)
    }

    /// Actions in execution order. The sort is stable so equal orders keep
    /// their stored sequence.
    pub fn ordered_actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().collect();
        actions.sort_by_key(|a| a.order);
        actions
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrigger {
    pub trigger_type: TriggerType,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub order: i32,
    pub config: ActionConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAutomation {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub enabled: bool,
    pub trigger: NewTrigger,
    pub actions: Vec<NewAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("automation name must be at least 2 characters")]
    NameTooShort,
    #[error("automation needs at least one action")]
    NoActions,
    #[error("action order {0} must not be negative")]
    NegativeOrder(i32),
    #[error("action order {0} is used more than once")]
    DuplicateOrder(i32),
}

impl NewAutomation {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().chars().count() < 2 {
            return Err(ValidationError::NameTooShort);
        }
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions);
        }
        let mut seen = HashSet::new();
        for action in &self.actions {
            if action.order < 0 {
                return Err(ValidationError::NegativeOrder(action.order));
            }
            if !seen.insert(action.order) {
                return Err(ValidationError::DuplicateOrder(action.order));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> WorkspaceId {
        WorkspaceId::parse("W1").unwrap()
    }

    fn new_automation(orders: &[i32]) -> NewAutomation {
        NewAutomation {
            workspace_id: ws(),
            name: "Welcome".into(),
            enabled: true,
            trigger: NewTrigger {
                trigger_type: TriggerType::ContactCreated,
                config: json!({}),
            },
            actions: orders
                .iter()
                .map(|order| NewAction {
                    order: *order,
                    config: ActionConfig::CreateTask(CreateTaskConfig::default()),
                })
                .collect(),
        }
    }

    #[test]
    fn from_parts_builds_typed_wait() {
        let config = ActionConfig::from_parts(ActionType::Wait, json!({"delayMinutes": 15}))
            .expect("wait config parses");
        assert_eq!(config, ActionConfig::Wait(WaitConfig { delay_minutes: 15.0 }));
        assert_eq!(config.schedule_delay(), Duration::from_millis(15 * 60_000));
        assert_eq!(config.config_value(), json!({"delayMinutes": 15}));
    }

    fn wait_delay(raw: Value) -> Duration {
        ActionConfig::from_parts(ActionType::Wait, json!({ "delayMinutes": raw }))
            .expect("wait config is lenient")
            .schedule_delay()
    }

    #[test]
    fn wait_accepts_fractional_minutes() {
        assert_eq!(wait_delay(json!(0.5)), Duration::from_millis(30_000));
    }

    #[test]
    fn wait_accepts_numeric_strings() {
        assert_eq!(wait_delay(json!("5")), Duration::from_millis(5 * 60_000));
        assert_eq!(wait_delay(json!(" 1.5 ")), Duration::from_millis(90_000));
    }

    #[test]
    fn wait_treats_negative_and_unreadable_delays_as_zero() {
        assert_eq!(wait_delay(json!(-1)), Duration::ZERO);
        assert_eq!(wait_delay(json!("soon")), Duration::ZERO);
        assert_eq!(wait_delay(Value::Null), Duration::ZERO);
        assert_eq!(
            ActionConfig::from_parts(ActionType::Wait, json!({}))
                .unwrap()
                .schedule_delay(),
            Duration::ZERO
        );
    }

    #[test]
    fn from_parts_treats_null_config_as_empty() {
        let config = ActionConfig::from_parts(ActionType::CreateTask, Value::Null)
            .expect("null config is allowed");
        match config {
            ActionConfig::CreateTask(task) => assert_eq!(task.body(), "Task created"),
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn from_parts_rejects_mistyped_fields() {
        let err = ActionConfig::from_parts(ActionType::SendSms, json!({"text": 5}));
        assert!(err.is_err());
    }

    #[test]
    fn config_value_keeps_camel_case_keys() {
        let config = ActionConfig::SendSms(SendSmsConfig {
            text: Some("Hi {{firstName}}".into()),
            body: None,
            contact_id: Some("C1".into()),
        });
        assert_eq!(
            config.config_value(),
            json!({"text": "Hi {{firstName}}", "contactId": "C1"})
        );
    }

    #[test]
    fn sms_template_falls_back_to_body() {
        let cfg = SendSmsConfig {
            text: None,
            body: Some("from body".into()),
            contact_id: None,
        };
        assert_eq!(cfg.template(), "from body");
        assert_eq!(SendSmsConfig::default().template(), "");
    }

    #[test]
    fn non_wait_actions_have_no_delay() {
        let config = ActionConfig::SendEmail(SendEmailConfig::default());
        assert_eq!(config.schedule_delay(), Duration::ZERO);
    }

    #[test]
    fn ordered_actions_sorts_ascending_and_is_stable() {
        let make = |id: &str, order: i32| Action {
            id: id.into(),
            workspace_id: ws(),
            automation_id: "A1".into(),
            order,
            config: ActionConfig::Wait(WaitConfig::default()),
        };
        let automation = Automation {
            id: "A1".into(),
            workspace_id: ws(),
            name: "Flow".into(),
            enabled: true,
            triggers: vec![],
            actions: vec![make("c", 2), make("a", 0), make("b1", 1), make("b2", 1)],
        };
        let ids: Vec<&str> = automation
            .ordered_actions()
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn validate_rejects_duplicate_orders() {
        assert_eq!(
            new_automation(&[0, 1, 1]).validate(),
            Err(ValidationError::DuplicateOrder(1))
        );
        assert!(new_automation(&[0, 1, 2]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_names_and_empty_actions() {
        let mut automation = new_automation(&[0]);
        automation.name = "x".into();
        assert_eq!(automation.validate(), Err(ValidationError::NameTooShort));

        let automation = new_automation(&[]);
        assert_eq!(automation.validate(), Err(ValidationError::NoActions));

        let automation = new_automation(&[-1]);
        assert_eq!(automation.validate(), Err(ValidationError::NegativeOrder(-1)));
    }
}
