use async_trait::async_trait;

pub use crate::services::DeliveryError;

mod mock_sms;
mod twilio_impl;

#[allow(unused_imports)]
pub use mock_sms::{MockSms, RecordedSms};
pub use twilio_impl::TwilioSms;

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Sends `body` to `to` and returns the provider's message id.
    async fn send(&self, to: &str, body: &str) -> Result<String, DeliveryError>;
}
