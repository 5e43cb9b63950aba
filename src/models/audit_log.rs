use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::workspace::WorkspaceId;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationAuditLog {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub automation_id: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditLog {
    pub workspace_id: WorkspaceId,
    pub automation_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}
