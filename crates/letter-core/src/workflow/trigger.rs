//! Bulk requests dropped as JSON files into the triggers directory
//!
//! Each `*.json` file holds one `BulkRequest`. After submission the file is
//! moved to `triggers/processed/`; unreadable or rejected requests go to
//! `triggers/failed/`.

use super::bulk::BulkCoordinator;
use crate::error::{LetterError, Result};
use crate::paths;
use letter_types::{BulkOperationId, BulkRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wait before re-reading a trigger that did not parse, in case its writer
/// had not finished when the file event fired
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Submitted(BulkOperationId),
    Rejected(String),
    /// Not a trigger file, left in place
    Ignored,
}

pub struct BulkTriggerInbox {
    bulk: BulkCoordinator,
    triggers_dir: PathBuf,
    processed_dir: PathBuf,
    failed_dir: PathBuf,
    settle_delay: Duration,
}

impl BulkTriggerInbox {
    /// Inbox below `data_root`; creates the directories if needed
    pub fn new(bulk: BulkCoordinator, data_root: &Path) -> Result<Self> {
        for dir in paths::trigger_directories(data_root) {
            std::fs::create_dir_all(&dir)?;
        }

        let triggers_dir = data_root.join(paths::TRIGGERS_DIR_NAME);
        Ok(Self {
            bulk,
            processed_dir: triggers_dir.join(paths::PROCESSED_DIR_NAME),
            failed_dir: triggers_dir.join(paths::FAILED_DIR_NAME),
            triggers_dir,
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn triggers_dir(&self) -> &Path {
        &self.triggers_dir
    }

    /// Submit every trigger file already waiting in the inbox
    pub async fn process_existing(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.triggers_dir).await?;
        let mut submitted = 0;

        while let Some(entry) = entries.next_entry().await? {
            if let TriggerOutcome::Submitted(_) = self.process_file(&entry.path()).await? {
                submitted += 1;
            }
        }

        if submitted > 0 {
            log::info!("Submitted {} waiting bulk trigger(s)", submitted);
        }
        Ok(submitted)
    }

    pub async fn process_file(&self, path: &Path) -> Result<TriggerOutcome> {
        if !is_trigger_file(path) || !tokio::fs::try_exists(path).await? {
            return Ok(TriggerOutcome::Ignored);
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| LetterError::Validation(format!("Invalid trigger path {:?}", path)))?
            .to_owned();

        log::info!("Processing bulk trigger file: {:?}", file_name);

        let outcome = match self.submit(path).await {
            Ok(operation_id) => {
                log::info!("Trigger {:?} started bulk operation {}", file_name, operation_id);
                TriggerOutcome::Submitted(operation_id)
            }
            Err(e) => {
                log::error!("Trigger {:?} rejected: {}", file_name, e);
                TriggerOutcome::Rejected(e.to_string())
            }
        };

        let destination = match outcome {
            TriggerOutcome::Submitted(_) => &self.processed_dir,
            _ => &self.failed_dir,
        };
        tokio::fs::rename(path, destination.join(&file_name)).await?;

        Ok(outcome)
    }

    async fn submit(&self, path: &Path) -> Result<BulkOperationId> {
        let request = match read_request(path).await {
            Ok(request) => request,
            Err(LetterError::Deserialization(e)) => {
                log::debug!("Trigger {:?} not parseable yet ({}), reading again", path, e);
                tokio::time::sleep(self.settle_delay).await;
                read_request(path).await?
            }
            Err(e) => return Err(e),
        };

        let operation = self.bulk.run_bulk(request).await?;
        Ok(operation.id)
    }
}

async fn read_request(path: &Path) -> Result<BulkRequest> {
    let content = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&content)
        .map_err(|e| LetterError::Deserialization(format!("Failed to parse BulkRequest JSON: {}", e)))
}

/// Plain `*.json` files directly in the inbox
pub fn is_trigger_file(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
        && !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true)
}
