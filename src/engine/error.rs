use thiserror::Error;

use crate::db::StoreError;
use crate::models::workspace::TenantScopeViolation;
use crate::queue::QueueError;
use crate::services::DeliveryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("step {step_id} is being executed by another worker")]
    StepBusy { step_id: String },
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error(transparent)]
    TenantScope(TenantScopeViolation),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("event channel closed")]
    ChannelClosed,
}

impl EngineError {
    /// Whether the queue should try the job again.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            EngineError::InvalidJob(_) | EngineError::TenantScope(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TenantScope(violation) => EngineError::TenantScope(violation),
            other => EngineError::Store(other),
        }
    }
}

impl From<TenantScopeViolation> for EngineError {
    fn from(err: TenantScopeViolation) -> Self {
        EngineError::TenantScope(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_violations_from_the_store_are_not_retried() {
        let err: EngineError =
            StoreError::TenantScope(TenantScopeViolation("foreign contact".into())).into();
        assert!(matches!(err, EngineError::TenantScope(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn transient_failures_are_retried() {
        assert!(EngineError::not_found("action", "a1").is_retriable());
        assert!(EngineError::StepBusy {
            step_id: "s1".into()
        }
        .is_retriable());
        assert!(EngineError::from(DeliveryError::Transport("timeout".into())).is_retriable());
        assert!(!EngineError::InvalidJob("schemaVersion 9".into()).is_retriable());
    }
}
