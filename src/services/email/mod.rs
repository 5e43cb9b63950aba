use async_trait::async_trait;

pub use crate::services::DeliveryError;

mod mock_email;
mod sendgrid_impl;

#[allow(unused_imports)]
pub use mock_email::{MockEmail, RecordedEmail};
pub use sendgrid_impl::SendgridEmail;

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends an HTML email. Returns the provider's message id when it
    /// reports one.
    async fn send(&self, to: &str, subject: &str, html: &str)
        -> Result<Option<String>, DeliveryError>;
}
