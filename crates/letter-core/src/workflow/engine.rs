//! Wiring of all workflow components behind one handle

use super::bulk::{BulkCoordinator, ItemProcessor};
use super::dispatcher::LetterDispatcher;
use super::retry::RetryManager;
use super::status_tracker::StatusTracker;
use crate::clients::{DocumentRenderer, EmailDispatcher};
use crate::config::LetterConfig;
use crate::error::Result;
use crate::services::{LetterGenerator, LetterPreview};
use crate::store::LetterStore;
use chrono::{DateTime, Utc};
use letter_types::{
    BatchStatusResult, BulkOperation, BulkOperationId, BulkRequest, DeliveryEvent, EmployeeId,
    GenerateRequest, GeneratedLetter, LetterId, LetterStatus, RetryResult, StatusHistoryEntry,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Failed letters above this count mark the service degraded
const DEGRADED_FAILED_LETTERS: usize = 10;

/// Runtime knobs taken from `WorkflowConfig` and the collaborator timeouts
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub max_retries: u32,
    pub bulk_parallelism: usize,
    pub render_timeout: Duration,
    pub mail_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            bulk_parallelism: 4,
            render_timeout: Duration::from_secs(30),
            mail_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&LetterConfig> for WorkflowSettings {
    fn from(config: &LetterConfig) -> Self {
        Self {
            max_retries: config.workflow.max_retries,
            bulk_parallelism: config.workflow.bulk_parallelism,
            render_timeout: Duration::from_secs(config.renderer.timeout_secs),
            mail_timeout: Duration::from_secs(config.mailer.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub letters_by_status: BTreeMap<String, usize>,
    pub running_operations: usize,
    pub checked_at: DateTime<Utc>,
}

/// The letter workflow engine
pub struct LetterWorkflow {
    store: Arc<dyn LetterStore>,
    generator: Arc<LetterGenerator>,
    tracker: Arc<StatusTracker>,
    dispatcher: Arc<LetterDispatcher>,
    bulk: BulkCoordinator,
    retry: RetryManager,
}

impl LetterWorkflow {
    pub fn new(
        store: Arc<dyn LetterStore>,
        renderer: Arc<dyn DocumentRenderer>,
        mailer: Arc<dyn EmailDispatcher>,
        settings: WorkflowSettings,
    ) -> Result<Self> {
        let generator = Arc::new(LetterGenerator::new(
            store.clone(),
            renderer,
            settings.render_timeout,
        )?);
        let tracker = Arc::new(StatusTracker::new(store.clone(), settings.max_retries));
        let dispatcher = Arc::new(LetterDispatcher::new(
            store.clone(),
            mailer,
            tracker.clone(),
            settings.mail_timeout,
        ));
        let processor = Arc::new(ItemProcessor::new(
            store.clone(),
            generator.clone(),
            dispatcher.clone(),
        ));
        let bulk = BulkCoordinator::new(store.clone(), processor, settings.bulk_parallelism);
        let retry = RetryManager::new(bulk.clone(), tracker.clone(), dispatcher.clone());

        log::info!(
            "Letter workflow ready (parallelism {}, max retries {})",
            settings.bulk_parallelism,
            settings.max_retries
        );

        Ok(Self {
            store,
            generator,
            tracker,
            dispatcher,
            bulk,
            retry,
        })
    }

    pub fn store(&self) -> &Arc<dyn LetterStore> {
        &self.store
    }

    pub fn bulk(&self) -> &BulkCoordinator {
        &self.bulk
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedLetter> {
        self.generator.generate(request).await
    }

    pub async fn preview(&self, request: &GenerateRequest) -> Result<LetterPreview> {
        self.generator.preview(request).await
    }

    pub async fn get_letter(&self, letter_id: &LetterId) -> Result<GeneratedLetter> {
        self.tracker.get_letter(letter_id).await
    }

    pub async fn send(&self, letter_id: &LetterId, actor: Option<&str>) -> Result<GeneratedLetter> {
        self.dispatcher.send(letter_id, actor).await
    }

    pub async fn resend(&self, letter_id: &LetterId, actor: Option<&str>) -> Result<GeneratedLetter> {
        self.retry.resend(letter_id, actor).await
    }

    pub async fn update_status(
        &self,
        letter_id: &LetterId,
        new_status: LetterStatus,
        notes: Option<String>,
        actor: Option<&str>,
    ) -> Result<GeneratedLetter> {
        self.tracker.update_status(letter_id, new_status, notes, actor).await
    }

    pub async fn update_status_batch(
        &self,
        letter_ids: &[LetterId],
        new_status: LetterStatus,
        notes: Option<String>,
        actor: Option<&str>,
    ) -> BatchStatusResult {
        self.tracker
            .update_status_batch(letter_ids, new_status, notes, actor)
            .await
    }

    pub async fn history(&self, letter_id: &LetterId) -> Result<Vec<StatusHistoryEntry>> {
        self.tracker.history(letter_id).await
    }

    pub async fn record_delivery_event(&self, event: &DeliveryEvent) -> Result<GeneratedLetter> {
        self.dispatcher.record_delivery_event(event).await
    }

    pub async fn run_bulk(&self, request: BulkRequest) -> Result<BulkOperation> {
        self.bulk.run_bulk(request).await
    }

    pub async fn bulk_status(&self, operation_id: &BulkOperationId) -> Result<BulkOperation> {
        self.bulk.get_status(operation_id).await
    }

    pub async fn list_bulk_operations(&self) -> Result<Vec<BulkOperation>> {
        self.bulk.list_operations().await
    }

    pub async fn cancel_bulk(&self, operation_id: &BulkOperationId) -> Result<bool> {
        self.bulk.cancel(operation_id).await
    }

    pub async fn retry_bulk(
        &self,
        operation_id: &BulkOperationId,
        item_ids: Option<&[EmployeeId]>,
    ) -> Result<RetryResult> {
        self.retry.retry_bulk(operation_id, item_ids).await
    }

    pub async fn health_check(&self) -> Result<HealthReport> {
        let letters_by_status = self.store.count_letters_by_status().await?;
        let failed = letters_by_status
            .get(LetterStatus::Failed.as_str())
            .copied()
            .unwrap_or(0);

        Ok(HealthReport {
            status: if failed > DEGRADED_FAILED_LETTERS {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            letters_by_status,
            running_operations: self.bulk.running_operations().await,
            checked_at: Utc::now(),
        })
    }
}
