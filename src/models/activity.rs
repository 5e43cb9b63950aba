use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::workspace::WorkspaceId;

pub const ACTIVITY_STATUS_SENT: &str = "sent";
pub const ACTIVITY_STATUS_OPEN: &str = "open";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityType {
    Sms,
    Email,
    Task,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Sms => "SMS",
            ActivityType::Email => "EMAIL",
            ActivityType::Task => "TASK",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SMS" => Ok(ActivityType::Sms),
            "EMAIL" => Ok(ActivityType::Email),
            "TASK" => Ok(ActivityType::Task),
            other => Err(format!("unknown activity type `{other}`")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub contact_id: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub body: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub workspace_id: WorkspaceId,
    pub contact_id: Option<String>,
    pub activity_type: ActivityType,
    pub body: String,
    pub status: String,
}
