use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::services::email::{DeliveryError, EmailSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// A mock email sender that records messages for tests.
#[derive(Debug, Default)]
pub struct MockEmail {
    pub sent: Mutex<Vec<RecordedEmail>>,
    pub fail_send: bool,
}

impl MockEmail {
    pub fn failing() -> Self {
        Self {
            fail_send: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<RecordedEmail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EmailSender for MockEmail {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<Option<String>, DeliveryError> {
        if self.fail_send {
            return Err(DeliveryError::Other("mock fail".into()));
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(RecordedEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(Some(format!("mock-email-{}", sent.len())))
    }
}
