use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised whenever a tenant-scoped read or write is attempted without a
/// usable workspace, or against a row owned by another workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tenant scope violation: {0}")]
pub struct TenantScopeViolation(pub String);

/// Identifier of the tenant every persisted entity belongs to.
///
/// An empty id cannot be constructed, so a storage call that takes a
/// `&WorkspaceId` can never run unscoped. Deserialization goes through the
/// same check, which makes events and queue payloads without a tenant fail at
/// the boundary instead of deep inside a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, TenantScopeViolation> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TenantScopeViolation(
                "workspaceId is required for tenant-scoped data".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = TenantScopeViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<WorkspaceId> for String {
    fn from(value: WorkspaceId) -> Self {
        value.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fails when `owner` is not the workspace the caller is scoped to.
pub(crate) fn ensure_same_workspace(
    scope: &WorkspaceId,
    owner: &WorkspaceId,
    entity: &str,
) -> Result<(), TenantScopeViolation> {
    if scope == owner {
        Ok(())
    } else {
        Err(TenantScopeViolation(format!(
            "{entity} belongs to another workspace"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_workspace_is_rejected() {
        assert!(WorkspaceId::parse("").is_err());
        assert!(WorkspaceId::parse("   ").is_err());
    }

    #[test]
    fn workspace_is_trimmed() {
        let ws = WorkspaceId::parse(" W1 ").expect("valid workspace");
        assert_eq!(ws.as_str(), "W1");
    }

    #[test]
    fn deserializing_blank_workspace_fails() {
        let err = serde_json::from_str::<WorkspaceId>("\"\"").expect_err("blank must fail");
        assert!(err.to_string().contains("tenant scope violation"));
    }

    #[test]
    fn cross_workspace_owner_is_a_violation() {
        let w1 = WorkspaceId::parse("W1").unwrap();
        let w2 = WorkspaceId::parse("W2").unwrap();
        assert!(ensure_same_workspace(&w1, &w1, "contact").is_ok());
        let err = ensure_same_workspace(&w1, &w2, "contact").unwrap_err();
        assert!(err.0.contains("contact"));
    }
}
