//! Send step and delivery events

use super::status_tracker::StatusTracker;
use crate::clients::{EmailAttachment, EmailDispatcher, EmailMessage};
use crate::error::{LetterError, Result};
use crate::store::LetterStore;
use chrono::Utc;
use letter_types::{
    BoundFields, DeliveryEvent, DeliveryEventKind, GeneratedLetter, LetterId, LetterStatus,
};
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_ACTOR: &str = "mail-provider";

pub struct LetterDispatcher {
    store: Arc<dyn LetterStore>,
    mailer: Arc<dyn EmailDispatcher>,
    tracker: Arc<StatusTracker>,
    mail_timeout: Duration,
}

impl LetterDispatcher {
    pub fn new(
        store: Arc<dyn LetterStore>,
        mailer: Arc<dyn EmailDispatcher>,
        tracker: Arc<StatusTracker>,
        mail_timeout: Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            tracker,
            mail_timeout,
        }
    }

    /// First send of a `Generated` letter
    pub async fn send(&self, letter_id: &LetterId, actor: Option<&str>) -> Result<GeneratedLetter> {
        let letter = self.tracker.get_letter(letter_id).await?;
        match letter.status {
            LetterStatus::Generated => self.deliver(&letter, actor).await,
            LetterStatus::Failed => Err(LetterError::Validation(format!(
                "Letter {} previously failed; resend it instead",
                letter.letter_number
            ))),
            from => Err(LetterError::InvalidTransition {
                from,
                to: LetterStatus::Sent,
            }),
        }
    }

    /// Resend a `Failed` letter, counting the attempt against the retry ceiling
    pub async fn resend(&self, letter: &GeneratedLetter, actor: Option<&str>) -> Result<GeneratedLetter> {
        if letter.status != LetterStatus::Failed {
            return Err(LetterError::InvalidTransition {
                from: letter.status,
                to: LetterStatus::Sent,
            });
        }

        let max_retries = self.tracker.max_retries();
        if letter.retry_count >= max_retries {
            log::warn!(
                "Letter {} reached the retry ceiling ({} of {})",
                letter.letter_number,
                letter.retry_count,
                max_retries
            );
            return Err(LetterError::RetryLimitExceeded {
                letter_id: letter.id.clone(),
                attempts: letter.retry_count,
                max_retries,
            });
        }

        log::info!(
            "Resending letter {} (attempt {} of {})",
            letter.letter_number,
            letter.retry_count + 1,
            max_retries
        );
        self.deliver(letter, actor).await
    }

    /// Hand the letter to the mail provider and record the outcome.
    ///
    /// Success moves the letter to `Sent`. Failure moves a `Generated`
    /// letter to `Failed` (a `Failed` letter stays there with the new error)
    /// and is returned as `DispatchFailure`. Delivering a `Failed` letter is
    /// a retry: the attempt is counted in the same commit as its outcome.
    pub async fn deliver(&self, letter: &GeneratedLetter, actor: Option<&str>) -> Result<GeneratedLetter> {
        let retrying = letter.status == LetterStatus::Failed;
        let count_attempt = move |l: &mut GeneratedLetter| {
            if retrying {
                l.retry_count += 1;
                l.last_retry_at = Some(Utc::now());
            }
        };

        match self.attempt(letter).await {
            Ok(message_id) => {
                self.tracker
                    .apply(letter, LetterStatus::Sent, actor, None, |l| {
                        count_attempt(l);
                        l.email_message_id = Some(message_id);
                        l.error_message = None;
                    })
                    .await
            }
            Err(e) => {
                let reason = match e {
                    LetterError::DispatchFailure(msg) => msg,
                    other => other.to_string(),
                };
                log::warn!("Dispatch of letter {} failed: {}", letter.letter_number, reason);

                let recorded = reason.clone();
                if retrying {
                    self.tracker
                        .amend(letter, |l| {
                            count_attempt(l);
                            l.error_message = Some(recorded);
                        })
                        .await?;
                } else {
                    self.tracker
                        .apply(letter, LetterStatus::Failed, actor, Some(reason.clone()), |l| {
                            l.error_message = Some(recorded)
                        })
                        .await?;
                }
                Err(LetterError::DispatchFailure(reason))
            }
        }
    }

    async fn attempt(&self, letter: &GeneratedLetter) -> Result<String> {
        let employee = self
            .store
            .get_employee(&letter.employee_id)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Employee {}", letter.employee_id)))?;
        let document = self.store.load_file(&letter.rendered_file).await?;
        let subject_template = self
            .store
            .get_template(&letter.template_id)
            .await?
            .map(|t| t.subject)
            .unwrap_or_default();

        let message = EmailMessage {
            to: employee.email.clone(),
            subject: render_subject(&subject_template, letter),
            body: format!(
                "Dear {},\n\nPlease find attached your {} letter ({}).\n",
                employee.name, letter.letter_type, letter.letter_number
            ),
            attachments: vec![EmailAttachment {
                file_name: format!("{}.pdf", letter.letter_number),
                content_type: "application/pdf".to_string(),
                data: document,
            }],
        };

        match tokio::time::timeout(self.mail_timeout, self.mailer.send_email(&message)).await {
            Ok(result) => result,
            Err(_) => Err(LetterError::DispatchFailure(format!(
                "Mail provider timed out after {}s",
                self.mail_timeout.as_secs_f32()
            ))),
        }
    }

    /// Apply a delivery report from the mail provider
    pub async fn record_delivery_event(&self, event: &DeliveryEvent) -> Result<GeneratedLetter> {
        let letter = match (&event.letter_id, &event.message_id) {
            (Some(letter_id), _) => self.tracker.get_letter(letter_id).await?,
            (None, Some(message_id)) => self
                .store
                .find_letter_by_message_id(message_id)
                .await?
                .ok_or_else(|| LetterError::NotFound(format!("Letter with message id {}", message_id)))?,
            (None, None) => {
                return Err(LetterError::Validation(
                    "Delivery event needs a letter id or a message id".to_string(),
                ))
            }
        };

        match event.kind {
            DeliveryEventKind::Delivered => {
                self.tracker
                    .apply(&letter, LetterStatus::Delivered, Some(PROVIDER_ACTOR), event.reason.clone(), |_| {})
                    .await
            }
            DeliveryEventKind::Bounced | DeliveryEventKind::Failed => {
                let reason = event
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("{:?} by mail provider", event.kind).to_lowercase());
                let notes = Some(reason.clone());
                self.tracker
                    .apply(&letter, LetterStatus::Failed, Some(PROVIDER_ACTOR), notes, |l| {
                        l.error_message = Some(reason)
                    })
                    .await
            }
        }
    }
}

/// Substitute `{{Field}}` placeholders from the letter's bound fields
pub fn render_subject(subject: &str, letter: &GeneratedLetter) -> String {
    if subject.trim().is_empty() {
        return format!("{} letter {}", letter.letter_type, letter.letter_number);
    }
    substitute(subject, &letter.fields)
}

fn substitute(text: &str, fields: &BoundFields) -> String {
    let mut out = text.to_string();
    for field in fields.iter() {
        out = out
            .replace(&format!("{{{{{}}}}}", field.name), &field.value)
            .replace(&format!("{{{{ {} }}}}", field.name), &field.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use letter_types::BoundField;

    #[test]
    fn test_substitute_placeholders() {
        let fields = BoundFields::new(vec![
            BoundField { name: "Name".to_string(), value: "Asha".to_string() },
            BoundField { name: "Amount".to_string(), value: "500".to_string() },
        ]);
        assert_eq!(
            substitute("Offer for {{Name}}: {{ Amount }} {{Other}}", &fields),
            "Offer for Asha: 500 {{Other}}"
        );
    }
}
