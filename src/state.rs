use std::sync::Arc;
use std::time::Duration;

use crate::db::automation_repository::AutomationRepository;
use crate::db::crm_repository::CrmRepository;
use crate::db::run_repository::RunRepository;
use crate::engine::audit::AuditRecorder;
use crate::queue::JobQueue;
use crate::services::email::EmailSender;
use crate::services::sms::SmsSender;

/// Everything the matcher, executor and workers share.
#[derive(Clone)]
pub struct EngineState {
    pub automations: Arc<dyn AutomationRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub crm: Arc<dyn CrmRepository>,
    pub audit: AuditRecorder,
    pub queue: Arc<dyn JobQueue>,
    /// `None` when no SMS provider is configured.
    pub sms: Option<Arc<dyn SmsSender>>,
    pub email: Option<Arc<dyn EmailSender>>,
    pub step_lease: Duration,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::memory_store::MemoryStore;
    use crate::queue::MemoryJobQueue;
    use crate::services::email::MockEmail;
    use crate::services::sms::MockSms;

    pub(crate) struct TestEngine {
        pub state: EngineState,
        pub store: Arc<MemoryStore>,
        pub queue: Arc<MemoryJobQueue>,
        pub sms: Arc<MockSms>,
        pub email: Arc<MockEmail>,
    }

    pub(crate) fn test_engine() -> TestEngine {
        test_engine_with(MockSms::default(), MockEmail::default())
    }

    pub(crate) fn test_engine_with(sms: MockSms, email: MockEmail) -> TestEngine {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::default());
        let sms = Arc::new(sms);
        let email = Arc::new(email);
        let state = EngineState {
            automations: store.clone(),
            runs: store.clone(),
            crm: store.clone(),
            audit: AuditRecorder::new(store.clone()),
            queue: queue.clone(),
            sms: Some(sms.clone()),
            email: Some(email.clone()),
            step_lease: Duration::from_secs(300),
        };
        TestEngine {
            state,
            store,
            queue,
            sms,
            email,
        }
    }
}
