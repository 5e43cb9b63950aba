use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::SendgridSettings;
use crate::services::email::{DeliveryError, EmailSender};
use crate::services::ensure_success;

const SENDGRID_API_BASE: &str = "https://api.sendgrid.com";

#[derive(Clone)]
pub struct SendgridEmail {
    api_key: String,
    from: String,
    base_url: String,
    http: Client,
}

impl SendgridEmail {
    pub fn new(http: &Client, settings: &SendgridSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            from: settings.from_email.clone(),
            base_url: SENDGRID_API_BASE.to_string(),
            http: http.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmailSender for SendgridEmail {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<Option<String>, DeliveryError> {
        let payload = json!({
            "personalizations": [ { "to": [ { "email": to } ] } ],
            "from": { "email": self.from },
            "subject": subject,
            "content": [ { "type": "text/html", "value": html } ]
        });

        let resp = self
            .http
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        Ok(resp
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SendgridSettings {
        SendgridSettings {
            api_key: "sg-key".into(),
            from_email: "crm@puenteflow.test".into(),
        }
    }

    #[tokio::test]
    async fn posts_html_mail_and_returns_message_id() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v3/mail/send")
                .header("authorization", "Bearer sg-key")
                .json_body(json!({
                    "personalizations": [ { "to": [ { "email": "avery@example.com" } ] } ],
                    "from": { "email": "crm@puenteflow.test" },
                    "subject": "Welcome",
                    "content": [ { "type": "text/html", "value": "<p>Hi Avery</p>" } ]
                }));
            then.status(202).header("X-Message-Id", "msg-7");
        });

        let email = SendgridEmail::new(&Client::new(), &settings()).with_base_url(server.url(""));
        let id = email
            .send("avery@example.com", "Welcome", "<p>Hi Avery</p>")
            .await
            .expect("send");

        mock.assert();
        assert_eq!(id.as_deref(), Some("msg-7"));
    }

    #[tokio::test]
    async fn server_error_is_rejected() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/v3/mail/send");
            then.status(500).body("boom");
        });

        let email = SendgridEmail::new(&Client::new(), &settings()).with_base_url(server.url(""));
        let err = email
            .send("avery@example.com", "Welcome", "hi")
            .await
            .expect_err("should fail");

        mock.assert();
        assert!(matches!(err, DeliveryError::Rejected { status: 500, .. }));
    }
}
