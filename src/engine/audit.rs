use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::db::audit_repository::AuditRepository;
use crate::models::audit_log::NewAuditLog;
use crate::models::workspace::WorkspaceId;

pub const WORKFLOW_QUEUED: &str = "workflow.queued";
pub const STEP_COMPLETED: &str = "workflow.step.completed";
pub const STEP_FAILED: &str = "workflow.step.failed";
pub const WORKFLOW_COMPLETED: &str = "workflow.completed";

/// Appends automation audit entries. A failed write is logged and
/// otherwise ignored, it never fails the caller.
#[derive(Clone)]
pub struct AuditRecorder {
    repo: Arc<dyn AuditRepository>,
}

impl AuditRecorder {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        workspace_id: &WorkspaceId,
        automation_id: &str,
        event: &str,
        payload: Value,
    ) {
        let entry = NewAuditLog {
            workspace_id: workspace_id.clone(),
            automation_id: automation_id.to_string(),
            event: event.to_string(),
            payload,
        };
        match self.repo.insert_audit_log(entry).await {
            Ok(log) => debug!(%workspace_id, automation_id, event, audit_id = %log.id, "audit recorded"),
            Err(err) => warn!(
                %workspace_id,
                automation_id,
                event,
                %err,
                "failed to record automation audit log"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::audit_repository::MockAuditRepository;
    use crate::db::StoreError;
    use crate::models::audit_log::AutomationAuditLog;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    #[derive(Clone)]
    struct BufferingMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferingMakeWriter {
        fn new() -> Self {
            Self {
                buffer: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn contents(&self) -> String {
            String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
        }
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BufferingMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn ws() -> WorkspaceId {
        WorkspaceId::parse("W1").unwrap()
    }

    #[tokio::test]
    async fn writes_entry_with_event_and_payload() {
        let mut repo = MockAuditRepository::new();
        repo.expect_insert_audit_log()
            .withf(|entry| {
                entry.workspace_id.as_str() == "W1"
                    && entry.automation_id == "auto-1"
                    && entry.event == WORKFLOW_QUEUED
                    && entry.payload == json!({ "contactId": "C1" })
            })
            .times(1)
            .returning(|entry| {
                Ok(AutomationAuditLog {
                    id: "log-1".into(),
                    workspace_id: entry.workspace_id,
                    automation_id: entry.automation_id,
                    event: entry.event,
                    payload: entry.payload,
                    created_at: OffsetDateTime::now_utc(),
                })
            });

        AuditRecorder::new(Arc::new(repo))
            .record(&ws(), "auto-1", WORKFLOW_QUEUED, json!({ "contactId": "C1" }))
            .await;
    }

    #[tokio::test]
    async fn failed_write_is_logged_not_raised() {
        let mut repo = MockAuditRepository::new();
        repo.expect_insert_audit_log()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("audit table locked".into())));

        let make_writer = BufferingMakeWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(make_writer.clone())
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);

        AuditRecorder::new(Arc::new(repo))
            .record(&ws(), "auto-1", STEP_FAILED, json!({ "error": "boom" }))
            .await;

        drop(guard);

        let logs = make_writer.contents();
        assert!(logs.contains("failed to record automation audit log"), "{logs}");
        assert!(logs.contains("audit table locked"), "{logs}");
        assert!(logs.contains("workflow.step.failed"), "{logs}");
    }
}
