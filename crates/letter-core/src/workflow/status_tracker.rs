//! Letter status state machine
//!
//! The tracker is the only component that changes `GeneratedLetter.status`.
//! Every accepted transition bumps the letter version and appends exactly one
//! history entry in the same store commit. Commits are conditional on the
//! version the change was computed from, so a concurrent writer gets
//! `Conflict` instead of silently overwriting.

use crate::error::{LetterError, Result};
use crate::services::SYSTEM_ACTOR;
use crate::store::LetterStore;
use chrono::Utc;
use letter_types::{
    BatchStatusItem, BatchStatusResult, GeneratedLetter, LetterId, LetterStatus, StatusHistoryEntry,
};
use std::sync::Arc;

pub struct StatusTracker {
    store: Arc<dyn LetterStore>,
    max_retries: u32,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn LetterStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn get_letter(&self, letter_id: &LetterId) -> Result<GeneratedLetter> {
        self.store
            .get_letter(letter_id)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Letter {}", letter_id)))
    }

    /// Move `letter` to `to`, letting `mutate` fill in transition details
    /// such as the message id or error text before the commit.
    pub async fn apply<F>(
        &self,
        letter: &GeneratedLetter,
        to: LetterStatus,
        actor: Option<&str>,
        notes: Option<String>,
        mutate: F,
    ) -> Result<GeneratedLetter>
    where
        F: FnOnce(&mut GeneratedLetter) + Send,
    {
        let from = letter.status;
        if !from.can_transition_to(to) {
            return Err(LetterError::InvalidTransition { from, to });
        }
        self.check_guard(letter, to)?;

        let now = Utc::now();
        let mut updated = letter.clone();
        updated.status = to;
        match to {
            LetterStatus::Sent => updated.sent_at = Some(now),
            LetterStatus::Delivered => updated.delivered_at = Some(now),
            LetterStatus::Generated | LetterStatus::Failed => {}
        }
        mutate(&mut updated);
        updated.version = letter.version + 1;

        let entry = StatusHistoryEntry::new(
            letter.id.clone(),
            Some(from),
            to,
            actor.unwrap_or(SYSTEM_ACTOR),
            notes,
        );
        self.store.commit_letter(&updated, letter.version, Some(&entry)).await?;

        log::info!("Letter {} moved {} -> {}", letter.letter_number, from, to);
        Ok(updated)
    }

    /// Change non-status fields (retry bookkeeping) under the same version check
    pub async fn amend<F>(&self, letter: &GeneratedLetter, mutate: F) -> Result<GeneratedLetter>
    where
        F: FnOnce(&mut GeneratedLetter) + Send,
    {
        let mut updated = letter.clone();
        mutate(&mut updated);
        updated.status = letter.status;
        updated.version = letter.version + 1;
        self.store.commit_letter(&updated, letter.version, None).await?;
        Ok(updated)
    }

    fn check_guard(&self, letter: &GeneratedLetter, to: LetterStatus) -> Result<()> {
        match (letter.status, to) {
            (LetterStatus::Generated, LetterStatus::Sent) if letter.rendered_file.is_empty() => {
                Err(LetterError::Validation(format!(
                    "Letter {} has no rendered file",
                    letter.letter_number
                )))
            }
            (LetterStatus::Failed, LetterStatus::Sent) if letter.retry_count >= self.max_retries => {
                Err(LetterError::RetryLimitExceeded {
                    letter_id: letter.id.clone(),
                    attempts: letter.retry_count,
                    max_retries: self.max_retries,
                })
            }
            _ => Ok(()),
        }
    }

    pub async fn update_status(
        &self,
        letter_id: &LetterId,
        new_status: LetterStatus,
        notes: Option<String>,
        actor: Option<&str>,
    ) -> Result<GeneratedLetter> {
        let letter = self.get_letter(letter_id).await?;
        self.apply(&letter, new_status, actor, notes, |_| {}).await
    }

    /// Apply one status to many letters; each letter succeeds or fails on its own
    pub async fn update_status_batch(
        &self,
        letter_ids: &[LetterId],
        new_status: LetterStatus,
        notes: Option<String>,
        actor: Option<&str>,
    ) -> BatchStatusResult {
        let mut results = Vec::with_capacity(letter_ids.len());

        for letter_id in letter_ids {
            let item = match self.update_status(letter_id, new_status, notes.clone(), actor).await {
                Ok(letter) => BatchStatusItem {
                    letter_id: letter_id.clone(),
                    success: true,
                    status: Some(letter.status),
                    error_message: None,
                },
                Err(e) => {
                    log::warn!("Batch status update for letter {} failed: {}", letter_id, e);
                    BatchStatusItem {
                        letter_id: letter_id.clone(),
                        success: false,
                        status: None,
                        error_message: Some(e.to_string()),
                    }
                }
            };
            results.push(item);
        }

        BatchStatusResult {
            all_succeeded: results.iter().all(|r| r.success),
            results,
        }
    }

    pub async fn history(&self, letter_id: &LetterId) -> Result<Vec<StatusHistoryEntry>> {
        self.get_letter(letter_id).await?;
        self.store.history(letter_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use letter_types::{BoundFields, EmployeeId, SignatureId, TemplateId};

    async fn seeded(status: LetterStatus) -> (Arc<MemoryStore>, GeneratedLetter) {
        let store = Arc::new(MemoryStore::new());
        let letter = GeneratedLetter {
            id: LetterId::generate(),
            letter_number: "OFFER-2026-000001".to_string(),
            letter_type: "Offer".to_string(),
            template_id: TemplateId::new("tpl"),
            employee_id: EmployeeId::new("emp"),
            signature_id: SignatureId::new("sig"),
            fields: BoundFields::default(),
            rendered_file: "files/OFFER-2026-000001.pdf".to_string(),
            status,
            generated_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            last_retry_at: None,
            email_message_id: None,
            error_message: None,
            retry_count: 0,
            version: 1,
        };
        let initial = StatusHistoryEntry::new(letter.id.clone(), None, status, "test", None);
        store.insert_letter(&letter, &initial).await.unwrap();
        (store, letter)
    }

    #[tokio::test]
    async fn test_accepted_transition_sets_timestamp_and_history() {
        let (store, letter) = seeded(LetterStatus::Generated).await;
        let tracker = StatusTracker::new(store, 3);

        let sent = tracker
            .update_status(&letter.id, LetterStatus::Sent, Some("manual".to_string()), Some("hr"))
            .await
            .unwrap();
        assert_eq!(sent.status, LetterStatus::Sent);
        assert!(sent.sent_at.is_some());
        assert_eq!(sent.version, 2);

        let history = tracker.history(&letter.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from_status, Some(LetterStatus::Generated));
        assert_eq!(history[1].actor, "hr");
        assert_eq!(history[1].notes.as_deref(), Some("manual"));
    }

    #[tokio::test]
    async fn test_invalid_transition_does_not_mutate() {
        let (store, letter) = seeded(LetterStatus::Generated).await;
        let tracker = StatusTracker::new(store, 3);

        let err = tracker
            .update_status(&letter.id, LetterStatus::Delivered, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LetterError::InvalidTransition {
                from: LetterStatus::Generated,
                to: LetterStatus::Delivered
            }
        ));

        let stored = tracker.get_letter(&letter.id).await.unwrap();
        assert_eq!(stored.status, LetterStatus::Generated);
        assert_eq!(stored.version, 1);
        assert_eq!(tracker.history(&letter.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_letter_conflicts() {
        let (store, letter) = seeded(LetterStatus::Generated).await;
        let tracker = StatusTracker::new(store, 3);

        tracker.apply(&letter, LetterStatus::Sent, None, None, |_| {}).await.unwrap();
        // `letter` still carries version 1
        let err = tracker
            .apply(&letter, LetterStatus::Failed, None, None, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LetterError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_to_sent_refused_at_retry_ceiling() {
        let (store, mut letter) = seeded(LetterStatus::Failed).await;
        let tracker = StatusTracker::new(store.clone(), 1);

        letter.retry_count = 1;
        letter.version = 2;
        store.commit_letter(&letter, 1, None).await.unwrap();

        let err = tracker
            .update_status(&letter.id, LetterStatus::Sent, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LetterError::RetryLimitExceeded { attempts: 1, max_retries: 1, .. }
        ));
        assert_eq!(tracker.get_letter(&letter.id).await.unwrap().status, LetterStatus::Failed);

        // below the ceiling the manual transition is allowed
        let tracker = StatusTracker::new(store, 2);
        let sent = tracker
            .update_status(&letter.id, LetterStatus::Sent, None, None)
            .await
            .unwrap();
        assert_eq!(sent.status, LetterStatus::Sent);
    }

    #[tokio::test]
    async fn test_batch_reports_each_letter() {
        let (store, letter) = seeded(LetterStatus::Sent).await;
        let tracker = StatusTracker::new(store, 3);

        let ids = vec![letter.id.clone(), LetterId::new("missing")];
        let result = tracker
            .update_status_batch(&ids, LetterStatus::Delivered, None, None)
            .await;

        assert!(!result.all_succeeded);
        assert!(result.results[0].success);
        assert_eq!(result.results[0].status, Some(LetterStatus::Delivered));
        assert!(!result.results[1].success);
        assert!(result.results[1].error_message.as_deref().unwrap().contains("Not found"));
    }

    #[tokio::test]
    async fn test_history_unknown_letter() {
        let (store, _) = seeded(LetterStatus::Generated).await;
        let tracker = StatusTracker::new(store, 3);
        assert!(matches!(
            tracker.history(&LetterId::new("nope")).await,
            Err(LetterError::NotFound(_))
        ));
    }
}
