use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::services::sms::{DeliveryError, SmsSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSms {
    pub to: String,
    pub body: String,
}

/// Records every SMS instead of sending it.
#[derive(Debug, Default)]
pub struct MockSms {
    pub sent: Mutex<Vec<RecordedSms>>,
    pub fail_send: bool,
}

impl MockSms {
    pub fn failing() -> Self {
        Self {
            fail_send: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<RecordedSms> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SmsSender for MockSms {
    async fn send(&self, to: &str, body: &str) -> Result<String, DeliveryError> {
        if self.fail_send {
            return Err(DeliveryError::Other("mock failure".into()));
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(RecordedSms {
            to: to.to_string(),
            body: body.to_string(),
        });
        Ok(format!("SM-mock-{}", sent.len()))
    }
}
