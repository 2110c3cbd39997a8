//! Email dispatcher client

use crate::config::MailerConfig;
use crate::error::{LetterError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::{debug, info};
use reqwest::Client as HttpClient;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Delivers a message and returns the provider's message id
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<String>;
}

/// Dispatcher backed by the mail provider's HTTP API
pub struct HttpMailer {
    config: MailerConfig,
    http_client: HttpClient,
}

impl HttpMailer {
    pub fn new(config: MailerConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LetterError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn request_body(&self, message: &EmailMessage) -> serde_json::Value {
        let attachments: Vec<serde_json::Value> = message
            .attachments
            .iter()
            .map(|attachment| {
                let content = general_purpose::STANDARD.encode(&attachment.data);
                // Provider verifies the MD5 of the base64 string
                let checksum = format!("{:x}", md5::compute(&content));
                serde_json::json!({
                    "filename": attachment.file_name,
                    "content_type": attachment.content_type,
                    "content_base64": content,
                    "checksum_md5": checksum,
                })
            })
            .collect();

        serde_json::json!({
            "from": self.config.from_address,
            "to": [message.to],
            "subject": message.subject,
            "text": message.body,
            "attachments": attachments,
        })
    }
}

#[async_trait]
impl EmailDispatcher for HttpMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<String> {
        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));

        debug!("Dispatching email to {} with {} attachment(s)", message.to, message.attachments.len());

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(message))
            .send()
            .await
            .map_err(|e| LetterError::DispatchFailure(format!("Mail provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LetterError::DispatchFailure(format!(
                "Mail provider returned {} - {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LetterError::DispatchFailure(format!("Invalid mail provider response: {}", e)))?;

        let message_id = result["id"]
            .as_str()
            .or_else(|| result["message_id"].as_str())
            .ok_or_else(|| LetterError::DispatchFailure("Mail provider response had no message id".to_string()))?
            .to_string();

        info!("Email to {} accepted as {}", message.to, message_id);
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> HttpMailer {
        HttpMailer::new(MailerConfig {
            base_url: "http://localhost:9000".to_string(),
            api_key: "key".to_string(),
            from_address: "hr@example.com".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_encodes_attachments() {
        let message = EmailMessage {
            to: "asha@example.com".to_string(),
            subject: "Offer".to_string(),
            body: "Please find attached".to_string(),
            attachments: vec![EmailAttachment {
                file_name: "OFFER-2026-000001.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                data: b"%PDF".to_vec(),
            }],
        };

        let body = mailer().request_body(&message);
        let encoded = general_purpose::STANDARD.encode(b"%PDF");

        assert_eq!(body["from"], "hr@example.com");
        assert_eq!(body["to"][0], "asha@example.com");
        assert_eq!(body["attachments"][0]["content_base64"], encoded.as_str());
        assert_eq!(
            body["attachments"][0]["checksum_md5"],
            format!("{:x}", md5::compute(&encoded)).as_str()
        );
    }
}
