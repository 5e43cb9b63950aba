use serde::{Deserialize, Serialize};

use super::workspace::WorkspaceId;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub contact_id: Option<String>,
    pub stage_id: String,
}
