//! In-process stand-ins for the renderer and mail provider
//!
//! Used by `--dry-run` deployments and by tests. Both stubs can be told to
//! fail for specific inputs so partial-failure paths can be exercised.

use super::mailer::{EmailDispatcher, EmailMessage};
use super::renderer::{DocumentRenderer, RenderRequest};
use crate::error::{LetterError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Produces a small text document instead of calling the rendering service
#[derive(Default)]
pub struct StubRenderer {
    failing_values: RwLock<HashSet<String>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every render call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail any render whose bound fields contain one of these values
    pub fn set_failing_values<I, S>(&self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.failing_values.write().unwrap_or_else(|e| e.into_inner());
        *guard = values.into_iter().map(Into::into).collect();
    }

    pub fn clear_failures(&self) {
        self.set_failing_values(Vec::<String>::new());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRenderer for StubRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let rejected = {
            let failing = self.failing_values.read().unwrap_or_else(|e| e.into_inner());
            request
                .fields
                .iter()
                .find(|f| failing.contains(&f.value))
                .map(|f| f.value.clone())
        };
        if let Some(value) = rejected {
            return Err(LetterError::RenderFailure(format!(
                "stub renderer rejected value '{}'",
                value
            )));
        }

        let mut document = format!("%PDF-STUB\n# {}\n", request.template_name);
        for field in request.fields.iter() {
            document.push_str(&format!("{}={}\n", field.name, field.value));
        }
        document.push_str(&format!("signature-bytes={}\n", request.signature_image.len()));
        Ok(document.into_bytes())
    }
}

/// Records messages instead of handing them to a mail provider
#[derive(Default)]
pub struct StubMailer {
    failing_recipients: RwLock<HashSet<String>>,
    fail_next: AtomicU32,
    delay: Duration,
    sent: tokio::sync::Mutex<Vec<EmailMessage>>,
    counter: AtomicUsize,
}

impl StubMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject every message addressed to one of these recipients
    pub fn set_failing_recipients<I, S>(&self, recipients: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.failing_recipients.write().unwrap_or_else(|e| e.into_inner());
        *guard = recipients.into_iter().map(Into::into).collect();
    }

    /// Reject the next `count` messages regardless of recipient
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub async fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl EmailDispatcher for StubMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outage = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(LetterError::DispatchFailure("stub mailer: simulated outage".to_string()));
        }

        let rejected = {
            let failing = self.failing_recipients.read().unwrap_or_else(|e| e.into_inner());
            failing.contains(&message.to)
        };
        if rejected {
            return Err(LetterError::DispatchFailure(format!(
                "stub mailer: recipient {} rejected",
                message.to
            )));
        }

        self.sent.lock().await.push(message.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("stub-{}", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use letter_types::{BoundField, BoundFields};

    fn fields(value: &str) -> BoundFields {
        BoundFields::new(vec![BoundField {
            name: "Amount".to_string(),
            value: value.to_string(),
        }])
    }

    #[tokio::test]
    async fn test_stub_renderer_fails_on_configured_value() {
        let renderer = StubRenderer::new();
        renderer.set_failing_values(["666"]);

        let ok = fields("500");
        let bad = fields("666");
        let request = |f| RenderRequest {
            template_name: "offer",
            template_content: "body",
            fields: f,
            signature_image: b"img",
        };

        let bytes = renderer.render(request(&ok)).await.unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("Amount=500"));
        assert!(matches!(renderer.render(request(&bad)).await, Err(LetterError::RenderFailure(_))));
        assert_eq!(renderer.calls(), 2);

        renderer.clear_failures();
        assert!(renderer.render(request(&bad)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stub_mailer_outage_then_success() {
        let mailer = StubMailer::new();
        mailer.fail_next(1);
        let message = EmailMessage {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            attachments: vec![],
        };

        assert!(mailer.send_email(&message).await.is_err());
        assert_eq!(mailer.send_email(&message).await.unwrap(), "stub-1");
        assert_eq!(mailer.sent_count().await, 1);
    }
}
