use async_trait::async_trait;

use crate::db::StoreError;
use crate::models::audit_log::{AutomationAuditLog, NewAuditLog};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert_audit_log(&self, entry: NewAuditLog) -> Result<AutomationAuditLog, StoreError>;
}
