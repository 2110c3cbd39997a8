//! Retrying failed bulk items and resending failed letters

use super::bulk::BulkCoordinator;
use super::dispatcher::LetterDispatcher;
use super::status_tracker::StatusTracker;
use crate::error::{LetterError, Result};
use futures::StreamExt;
use letter_types::{BulkOperationId, EmployeeId, GeneratedLetter, LetterId, RetryResult};
use std::sync::Arc;

pub struct RetryManager {
    bulk: BulkCoordinator,
    tracker: Arc<StatusTracker>,
    dispatcher: Arc<LetterDispatcher>,
}

impl RetryManager {
    pub fn new(
        bulk: BulkCoordinator,
        tracker: Arc<StatusTracker>,
        dispatcher: Arc<LetterDispatcher>,
    ) -> Self {
        Self {
            bulk,
            tracker,
            dispatcher,
        }
    }

    /// Re-run the failed items of a finished bulk operation.
    ///
    /// `item_ids` narrows the retry to those employees; anything requested
    /// that is not currently failed is reported as skipped and not executed.
    pub async fn retry_bulk(
        &self,
        operation_id: &BulkOperationId,
        item_ids: Option<&[EmployeeId]>,
    ) -> Result<RetryResult> {
        let mut operation = self.bulk.get_status(operation_id).await?;
        if operation.is_running() {
            return Err(LetterError::Validation(format!(
                "Bulk operation {} is still running",
                operation_id
            )));
        }

        let Some(token) = self.bulk.claim(operation_id).await else {
            return Err(LetterError::Validation(format!(
                "Bulk operation {} is busy",
                operation_id
            )));
        };

        let failed = operation.failed_employee_ids();
        let requested: Vec<EmployeeId> = match item_ids {
            Some(ids) => ids.to_vec(),
            None => failed.clone(),
        };

        let mut result = RetryResult::default();
        let mut to_retry = Vec::new();
        for id in requested {
            if failed.contains(&id) && !to_retry.contains(&id) {
                to_retry.push(id);
            } else if !result.skipped.contains(&id) {
                result.skipped.push(id);
            }
        }

        log::info!(
            "Retrying {} failed item(s) of bulk operation {} ({} skipped)",
            to_retry.len(),
            operation_id,
            result.skipped.len()
        );

        let outcomes: Vec<_> = self
            .bulk
            .run_items(Arc::new(operation.request.clone()), to_retry.clone(), token)
            .collect()
            .await;

        for outcome in outcomes {
            let employee_id = outcome.employee_id.clone();
            let success = outcome.success;
            if operation.record_retry(outcome) {
                if success {
                    result.succeeded.push(employee_id);
                } else {
                    result.still_failed.push(employee_id);
                }
            }
        }
        result.retried = to_retry;

        let saved = self.bulk.save(&operation).await;
        self.bulk.release(operation_id).await;
        saved?;

        Ok(result)
    }

    /// Resend a `Failed` letter without regenerating it
    pub async fn resend(&self, letter_id: &LetterId, actor: Option<&str>) -> Result<GeneratedLetter> {
        let letter = self.tracker.get_letter(letter_id).await?;
        self.dispatcher.resend(&letter, actor).await
    }
}
