//! File-backed store
//! JSON documents below a data root, written via temp file + rename

use super::LetterStore;
use crate::error::{LetterError, Result};
use crate::paths;
use async_trait::async_trait;
use letter_types::{
    BulkOperation, BulkOperationId, DigitalSignature, Employee, EmployeeId, GeneratedLetter,
    LetterId, LetterTemplate, SignatureId, StatusHistoryEntry, TemplateId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Store persisting each record as its own JSON file
pub struct FileStore {
    root_path: PathBuf,
    /// Serialises every write so version checks and sequences stay consistent
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create the store, creating the directory layout if needed
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        for dir in paths::store_directories(&root_path)
            .into_iter()
            .chain(paths::trigger_directories(&root_path))
        {
            std::fs::create_dir_all(&dir)?;
        }

        let replayed = recover_staged(&root_path)?;
        if replayed > 0 {
            log::warn!("Replayed {} staged history file(s) from an interrupted write", replayed);
        }

        Ok(Self {
            root_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn record_path(&self, dir: &str, prefix: &str, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(LetterError::Validation(format!("Invalid record id '{}'", id)));
        }
        Ok(self.root_path.join(dir).join(format!("{}_{}.json", prefix, id)))
    }

    /// Resolve a file reference, refusing anything that escapes the root
    fn resolve_reference(&self, reference: &str) -> Result<PathBuf> {
        let path = Path::new(reference);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        if path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(LetterError::Validation(format!("Invalid file reference '{}'", reference)));
        }
        Ok(self.root_path.join(path))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&json).map(Some).map_err(|e| {
            LetterError::Deserialization(format!("Failed to deserialize {}: {}", path.display(), e))
        })
    }

    /// Write to `<path>.tmp` and return the temp path; the caller renames it
    async fn stage_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| LetterError::Serialization(format!("Failed to serialize record: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        Ok(tmp)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = self.stage_json(path, value).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn list_dir<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let dir = self.root_path.join(dir);
        let mut records = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_json::<T>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }

        Ok(records)
    }

    fn letter_path(&self, id: &LetterId) -> Result<PathBuf> {
        self.record_path(paths::LETTERS_DIR_NAME, "letter", id.as_str())
    }

    fn history_path(&self, id: &LetterId) -> Result<PathBuf> {
        self.record_path(paths::HISTORY_DIR_NAME, "history", id.as_str())
    }

    fn sequences_path(&self) -> PathBuf {
        self.root_path.join(paths::SEQUENCES_FILE_NAME)
    }
}

#[async_trait]
impl LetterStore for FileStore {
    async fn get_template(&self, id: &TemplateId) -> Result<Option<LetterTemplate>> {
        let path = self.record_path(paths::TEMPLATES_DIR_NAME, "template", id.as_str())?;
        self.read_json(&path).await
    }

    async fn save_template(&self, template: &LetterTemplate) -> Result<()> {
        let path = self.record_path(paths::TEMPLATES_DIR_NAME, "template", template.id.as_str())?;
        let _guard = self.write_lock.lock().await;
        self.write_json(&path, template).await
    }

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>> {
        let path = self.record_path(paths::EMPLOYEES_DIR_NAME, "employee", id.as_str())?;
        self.read_json(&path).await
    }

    async fn save_employee(&self, employee: &Employee) -> Result<()> {
        let path = self.record_path(paths::EMPLOYEES_DIR_NAME, "employee", employee.id.as_str())?;
        let _guard = self.write_lock.lock().await;
        self.write_json(&path, employee).await
    }

    async fn get_signature(&self, id: &SignatureId) -> Result<Option<DigitalSignature>> {
        let path = self.record_path(paths::SIGNATURES_DIR_NAME, "signature", id.as_str())?;
        self.read_json(&path).await
    }

    async fn save_signature(&self, signature: &DigitalSignature) -> Result<()> {
        let path = self.record_path(paths::SIGNATURES_DIR_NAME, "signature", signature.id.as_str())?;
        let _guard = self.write_lock.lock().await;
        self.write_json(&path, signature).await
    }

    async fn list_signatures(&self) -> Result<Vec<DigitalSignature>> {
        self.list_dir(paths::SIGNATURES_DIR_NAME).await
    }

    async fn get_letter(&self, id: &LetterId) -> Result<Option<GeneratedLetter>> {
        self.read_json(&self.letter_path(id)?).await
    }

    async fn list_letters(&self) -> Result<Vec<GeneratedLetter>> {
        self.list_dir(paths::LETTERS_DIR_NAME).await
    }

    async fn insert_letter(&self, letter: &GeneratedLetter, initial: &StatusHistoryEntry) -> Result<()> {
        let letter_path = self.letter_path(&letter.id)?;
        let history_path = self.history_path(&letter.id)?;

        let _guard = self.write_lock.lock().await;
        if fs::try_exists(&letter_path).await? {
            return Err(LetterError::Conflict(format!("Letter {} already exists", letter.id)));
        }

        let letter_tmp = self.stage_json(&letter_path, letter).await?;
        let history_tmp = self.stage_json(&history_path, &vec![initial.clone()]).await?;
        fs::rename(&letter_tmp, &letter_path).await?;
        fs::rename(&history_tmp, &history_path).await?;

        log::debug!("Stored letter {} ({})", letter.id, letter.letter_number);
        Ok(())
    }

    async fn commit_letter(
        &self,
        letter: &GeneratedLetter,
        expected_version: u64,
        entry: Option<&StatusHistoryEntry>,
    ) -> Result<()> {
        let letter_path = self.letter_path(&letter.id)?;
        let history_path = self.history_path(&letter.id)?;

        let _guard = self.write_lock.lock().await;
        let stored: GeneratedLetter = self
            .read_json(&letter_path)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Letter {}", letter.id)))?;

        if stored.version != expected_version {
            return Err(LetterError::Conflict(format!(
                "Letter {} is at version {}, expected {}",
                letter.id, stored.version, expected_version
            )));
        }

        // Letter is staged and published first; `recover_staged` replays a
        // history file left staged behind a published letter
        let letter_tmp = self.stage_json(&letter_path, letter).await?;
        let history_tmp = match entry {
            Some(entry) => {
                let mut history: Vec<StatusHistoryEntry> =
                    self.read_json(&history_path).await?.unwrap_or_default();
                history.push(entry.clone());
                Some(self.stage_json(&history_path, &history).await?)
            }
            None => None,
        };

        fs::rename(&letter_tmp, &letter_path).await?;
        if let Some(history_tmp) = history_tmp {
            fs::rename(&history_tmp, &history_path).await?;
        }
        Ok(())
    }

    async fn history(&self, letter_id: &LetterId) -> Result<Vec<StatusHistoryEntry>> {
        let mut entries: Vec<StatusHistoryEntry> = self
            .read_json(&self.history_path(letter_id)?)
            .await?
            .unwrap_or_default();
        entries.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));
        Ok(entries)
    }

    async fn next_sequence(&self, letter_type: &str) -> Result<u64> {
        let path = self.sequences_path();

        let _guard = self.write_lock.lock().await;
        let mut sequences: BTreeMap<String, u64> = self.read_json(&path).await?.unwrap_or_default();
        let value = sequences.entry(letter_type.to_string()).or_insert(0);
        *value += 1;
        let issued = *value;
        self.write_json(&path, &sequences).await?;
        Ok(issued)
    }

    async fn save_rendered(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let reference = format!("{}/{}", paths::FILES_DIR_NAME, file_name);
        let path = self.resolve_reference(&reference)?;
        fs::write(&path, bytes).await?;
        Ok(reference)
    }

    async fn load_file(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.resolve_reference(reference)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LetterError::NotFound(format!("File {}", reference)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_bulk_operation(&self, operation: &BulkOperation) -> Result<()> {
        let path = self.record_path(paths::BULK_DIR_NAME, "bulk", operation.id.as_str())?;
        let _guard = self.write_lock.lock().await;
        self.write_json(&path, operation).await
    }

    async fn get_bulk_operation(&self, id: &BulkOperationId) -> Result<Option<BulkOperation>> {
        let path = self.record_path(paths::BULK_DIR_NAME, "bulk", id.as_str())?;
        self.read_json(&path).await
    }

    async fn list_bulk_operations(&self) -> Result<Vec<BulkOperation>> {
        let mut operations: Vec<BulkOperation> = self.list_dir(paths::BULK_DIR_NAME).await?;
        operations.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(operations)
    }
}

const STAGED_SUFFIX: &str = ".json.tmp";

/// Finish or discard writes interrupted between staging and rename.
///
/// A staged history file is published only when its letter has no staged
/// file left, i.e. the letter rename already happened. Every other staged
/// file belongs to a commit that never landed and is removed. Returns the
/// number of history files replayed.
fn recover_staged(root: &Path) -> Result<usize> {
    let letters_dir = root.join(paths::LETTERS_DIR_NAME);
    let history_dir = root.join(paths::HISTORY_DIR_NAME);
    let mut replayed = 0;

    for path in staged_files(&history_dir)? {
        let letter_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("history_"))
            .and_then(|n| n.strip_suffix(STAGED_SUFFIX))
            .unwrap_or_default();
        let letter_staged = letters_dir
            .join(format!("letter_{}{}", letter_id, STAGED_SUFFIX))
            .exists();
        let letter_published = letters_dir.join(format!("letter_{}.json", letter_id)).exists();

        if !letter_id.is_empty() && letter_published && !letter_staged {
            let target = history_dir.join(format!("history_{}.json", letter_id));
            std::fs::rename(&path, &target).map_err(|e| {
                LetterError::Storage(format!("Failed to replay {}: {}", path.display(), e))
            })?;
            replayed += 1;
        } else {
            discard_staged(&path)?;
        }
    }

    for dir in paths::store_directories(root) {
        for path in staged_files(&dir)? {
            discard_staged(&path)?;
        }
    }

    Ok(replayed)
}

fn staged_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LetterError::Storage(format!("Failed to scan {}: {}", dir.display(), e)))?;

    let mut staged = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.to_string_lossy().ends_with(STAGED_SUFFIX) {
            staged.push(path);
        }
    }
    Ok(staged)
}

fn discard_staged(path: &Path) -> Result<()> {
    log::warn!("Discarding interrupted write {}", path.display());
    std::fs::remove_file(path)
        .map_err(|e| LetterError::Storage(format!("Failed to remove {}: {}", path.display(), e)))
}
