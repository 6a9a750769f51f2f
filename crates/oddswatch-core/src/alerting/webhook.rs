//! Webhook transport (generic JSON or Slack incoming webhook)

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::notifier::{Message, Transport, TransportError};
use crate::config::{NotifierConfig, WebhookFormat};
use crate::error::{Error, Result};

/// Posts each message to a webhook URL
pub struct WebhookTransport {
    client: Client,
    url: String,
    format: WebhookFormat,
    auth_token: Option<String>,
}

impl WebhookTransport {
    /// Create a transport from notifier configuration
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        let url = config
            .webhook_url
            .clone()
            .ok_or_else(|| Error::config("notifier.webhook_url is not set"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            format: config.format,
            auth_token: config.auth_token.clone(),
        })
    }

    fn payload(&self, message: &Message) -> serde_json::Value {
        match self.format {
            WebhookFormat::Generic => serde_json::json!(message),
            WebhookFormat::Slack => serde_json::json!(SlackPayload {
                username: "oddswatch".to_string(),
                text: message.subject.clone(),
                attachments: vec![SlackAttachment {
                    color: "#ffc107".to_string(),
                    title: message.subject.clone(),
                    text: message.body.clone(),
                    footer: "oddswatch".to_string(),
                    ts: Utc::now().timestamp(),
                }],
            }),
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn deliver(&self, message: &Message) -> std::result::Result<(), TransportError> {
        let mut request = self.client.post(&self.url).json(&self.payload(message));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %self.url, %status, "Webhook accepted message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body))
    }
}

fn classify(status: StatusCode, body: String) -> TransportError {
    let detail = format!("webhook returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => TransportError::Transient(detail),
        s if s.is_server_error() => TransportError::Transient(detail),
        _ => TransportError::Permanent(detail),
    }
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload {
    username: String,
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    title: String,
    text: String,
    footer: String,
    ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, format: WebhookFormat) -> NotifierConfig {
        NotifierConfig {
            webhook_url: Some(format!("{}/hook", server.uri())),
            format,
            ..NotifierConfig::default()
        }
    }

    fn message() -> Message {
        Message {
            subject: "[Odds Alert] Win Odds Low".to_string(),
            body: "Thunder Bolt (1) odds dropped to 1.2 at Test Track".to_string(),
        }
    }

    #[tokio::test]
    async fn test_generic_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "subject": "[Odds Alert] Win Odds Low",
                "body": "Thunder Bolt (1) odds dropped to 1.2 at Test Track"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(&config(&server, WebhookFormat::Generic)).unwrap();
        transport.deliver(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_slack_payload_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(json!({
                "text": "[Odds Alert] Win Odds Low",
                "attachments": [{"title": "[Odds Alert] Win Odds Low"}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server, WebhookFormat::Slack);
        config.auth_token = Some("s3cret".to_string());
        let transport = WebhookTransport::new(&config).unwrap();
        transport.deliver(&message()).await.unwrap();
    }

    #[rstest]
    #[case(401, "auth")]
    #[case(403, "auth")]
    #[case(408, "transient")]
    #[case(429, "transient")]
    #[case(502, "transient")]
    #[case(400, "permanent")]
    #[case(404, "permanent")]
    #[tokio::test]
    async fn test_status_classification(#[case] status: u16, #[case] expected: &str) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(&config(&server, WebhookFormat::Generic)).unwrap();
        let class = match transport.deliver(&message()).await.unwrap_err() {
            TransportError::Auth(_) => "auth",
            TransportError::Transient(_) => "transient",
            TransportError::Permanent(_) => "permanent",
        };
        assert_eq!(class, expected);
    }

    #[tokio::test]
    async fn test_connection_error_is_transient() {
        let config = NotifierConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".to_string()),
            timeout_secs: 1,
            ..NotifierConfig::default()
        };
        let transport = WebhookTransport::new(&config).unwrap();
        assert!(matches!(
            transport.deliver(&message()).await,
            Err(TransportError::Transient(_))
        ));
    }

    #[test]
    fn test_requires_url() {
        assert!(WebhookTransport::new(&NotifierConfig::default()).is_err());
    }
}
