use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::workspace::WorkspaceId;

/// Free-form key/value payload attached to events and carried on every step job.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    #[serde(rename = "contact.created")]
    ContactCreated,
    #[serde(rename = "form.submitted")]
    FormSubmitted,
    #[serde(rename = "opportunity.stage_changed")]
    OpportunityStageChanged,
    #[serde(rename = "inbound.sms_received")]
    InboundSmsReceived,
}

impl TriggerType {
    pub const ALL: [TriggerType; 4] = [
        TriggerType::ContactCreated,
        TriggerType::FormSubmitted,
        TriggerType::OpportunityStageChanged,
        TriggerType::InboundSmsReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::ContactCreated => "contact.created",
            TriggerType::FormSubmitted => "form.submitted",
            TriggerType::OpportunityStageChanged => "opportunity.stage_changed",
            TriggerType::InboundSmsReceived => "inbound.sms_received",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown trigger type `{s}`"))
    }
}

/// A tenant-scoped fact that may start automations. Never persisted as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub workspace_id: WorkspaceId,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub payload: Payload,
}

impl DomainEvent {
    pub fn new(workspace_id: WorkspaceId, trigger_type: TriggerType, payload: Payload) -> Self {
        Self {
            workspace_id,
            trigger_type,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_parses_from_producer_json() {
        let event: DomainEvent = serde_json::from_value(json!({
            "workspaceId": "W1",
            "type": "contact.created",
            "payload": {"contactId": "C1"}
        }))
        .expect("event should parse");

        assert_eq!(event.workspace_id.as_str(), "W1");
        assert_eq!(event.trigger_type, TriggerType::ContactCreated);
        assert_eq!(event.payload.get("contactId"), Some(&json!("C1")));
    }

    #[test]
    fn event_without_workspace_is_rejected() {
        let err = serde_json::from_value::<DomainEvent>(json!({
            "workspaceId": "",
            "type": "form.submitted",
            "payload": {}
        }))
        .expect_err("blank workspace must fail");
        assert!(err.to_string().contains("tenant scope violation"));
    }

    #[test]
    fn trigger_type_round_trips_through_str() {
        for t in TriggerType::ALL {
            assert_eq!(t.as_str().parse::<TriggerType>(), Ok(t));
        }
        assert!("contact.deleted".parse::<TriggerType>().is_err());
    }
}
