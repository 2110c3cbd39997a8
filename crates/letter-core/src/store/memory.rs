//! In-memory store for tests and dry runs

use super::LetterStore;
use crate::error::{LetterError, Result};
use async_trait::async_trait;
use letter_types::{
    BulkOperation, BulkOperationId, DigitalSignature, Employee, EmployeeId, GeneratedLetter,
    LetterId, LetterTemplate, SignatureId, StatusHistoryEntry, TemplateId,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    templates: HashMap<TemplateId, LetterTemplate>,
    employees: HashMap<EmployeeId, Employee>,
    signatures: HashMap<SignatureId, DigitalSignature>,
    letters: HashMap<LetterId, GeneratedLetter>,
    history: HashMap<LetterId, Vec<StatusHistoryEntry>>,
    sequences: HashMap<String, u64>,
    files: HashMap<String, Vec<u8>>,
    bulk: HashMap<BulkOperationId, BulkOperation>,
}

/// Store holding everything in process memory behind one lock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make raw bytes available under `reference`, e.g. a signature image
    pub async fn put_file(&self, reference: impl Into<String>, bytes: Vec<u8>) {
        self.tables.write().await.files.insert(reference.into(), bytes);
    }
}

#[async_trait]
impl LetterStore for MemoryStore {
    async fn get_template(&self, id: &TemplateId) -> Result<Option<LetterTemplate>> {
        Ok(self.tables.read().await.templates.get(id).cloned())
    }

    async fn save_template(&self, template: &LetterTemplate) -> Result<()> {
        self.tables.write().await.templates.insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>> {
        Ok(self.tables.read().await.employees.get(id).cloned())
    }

    async fn save_employee(&self, employee: &Employee) -> Result<()> {
        self.tables.write().await.employees.insert(employee.id.clone(), employee.clone());
        Ok(())
    }

    async fn get_signature(&self, id: &SignatureId) -> Result<Option<DigitalSignature>> {
        Ok(self.tables.read().await.signatures.get(id).cloned())
    }

    async fn save_signature(&self, signature: &DigitalSignature) -> Result<()> {
        self.tables.write().await.signatures.insert(signature.id.clone(), signature.clone());
        Ok(())
    }

    async fn list_signatures(&self) -> Result<Vec<DigitalSignature>> {
        Ok(self.tables.read().await.signatures.values().cloned().collect())
    }

    async fn get_letter(&self, id: &LetterId) -> Result<Option<GeneratedLetter>> {
        Ok(self.tables.read().await.letters.get(id).cloned())
    }

    async fn list_letters(&self) -> Result<Vec<GeneratedLetter>> {
        Ok(self.tables.read().await.letters.values().cloned().collect())
    }

    async fn insert_letter(&self, letter: &GeneratedLetter, initial: &StatusHistoryEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.letters.contains_key(&letter.id) {
            return Err(LetterError::Conflict(format!("Letter {} already exists", letter.id)));
        }
        tables.letters.insert(letter.id.clone(), letter.clone());
        tables.history.insert(letter.id.clone(), vec![initial.clone()]);
        Ok(())
    }

    async fn commit_letter(
        &self,
        letter: &GeneratedLetter,
        expected_version: u64,
        entry: Option<&StatusHistoryEntry>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .letters
            .get(&letter.id)
            .ok_or_else(|| LetterError::NotFound(format!("Letter {}", letter.id)))?;

        if stored.version != expected_version {
            return Err(LetterError::Conflict(format!(
                "Letter {} is at version {}, expected {}",
                letter.id, stored.version, expected_version
            )));
        }

        tables.letters.insert(letter.id.clone(), letter.clone());
        if let Some(entry) = entry {
            tables.history.entry(letter.id.clone()).or_default().push(entry.clone());
        }
        Ok(())
    }

    async fn history(&self, letter_id: &LetterId) -> Result<Vec<StatusHistoryEntry>> {
        let mut entries = self
            .tables
            .read()
            .await
            .history
            .get(letter_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by(|a, b| a.changed_at.cmp(&b.changed_at));
        Ok(entries)
    }

    async fn next_sequence(&self, letter_type: &str) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let value = tables.sequences.entry(letter_type.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn save_rendered(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let reference = format!("{}/{}", crate::paths::FILES_DIR_NAME, file_name);
        self.tables.write().await.files.insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    async fn load_file(&self, reference: &str) -> Result<Vec<u8>> {
        self.tables
            .read()
            .await
            .files
            .get(reference)
            .cloned()
            .ok_or_else(|| LetterError::NotFound(format!("File {}", reference)))
    }

    async fn save_bulk_operation(&self, operation: &BulkOperation) -> Result<()> {
        self.tables.write().await.bulk.insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    async fn get_bulk_operation(&self, id: &BulkOperationId) -> Result<Option<BulkOperation>> {
        Ok(self.tables.read().await.bulk.get(id).cloned())
    }

    async fn list_bulk_operations(&self) -> Result<Vec<BulkOperation>> {
        let mut operations: Vec<BulkOperation> = self.tables.read().await.bulk.values().cloned().collect();
        operations.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(operations)
    }
}
