pub mod email;
pub mod sms;

use std::fmt;

/// Failure reported by an outbound delivery provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    Transport(String),
    Rejected { status: u16, body: String },
    InvalidResponse(String),
    Other(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transport(e) => write!(f, "Transport error: {}", e),
            DeliveryError::Rejected { status, body } => {
                write!(f, "Provider rejected request: {} {}", status, body)
            }
            DeliveryError::InvalidResponse(e) => write!(f, "Invalid provider response: {}", e),
            DeliveryError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Turns a non-success response into [`DeliveryError::Rejected`].
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, DeliveryError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected { status, body })
}
