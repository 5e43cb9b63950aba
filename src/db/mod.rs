pub mod audit_repository;
pub mod automation_repository;
pub mod crm_repository;
pub mod memory_store;
pub mod postgres_workflow_store;
pub mod run_repository;

use thiserror::Error;

use crate::models::automation::ValidationError;
use crate::models::workspace::TenantScopeViolation;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    TenantScope(#[from] TenantScopeViolation),
    #[error("invalid automation: {0}")]
    Invalid(#[from] ValidationError),
    #[error("stored {entity} {id} is malformed: {reason}")]
    Corrupt {
        entity: &'static str,
        id: String,
        reason: String,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub(crate) fn corrupt(entity: &'static str, id: &str, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            entity,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}
