//! Persistence for templates, employees, signatures, letters and bulk operations

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use letter_types::{
    BulkOperation, BulkOperationId, DigitalSignature, Employee, EmployeeId, GeneratedLetter,
    LetterId, LetterStatus, LetterTemplate, SignatureId, StatusHistoryEntry, TemplateId,
};
use std::collections::BTreeMap;

/// Storage seam used by every workflow component.
///
/// Implementations must make `commit_letter` atomic with respect to other
/// writers: the version check, the letter write and the history append
/// either all happen or none do.
#[async_trait]
pub trait LetterStore: Send + Sync {
    async fn get_template(&self, id: &TemplateId) -> Result<Option<LetterTemplate>>;
    async fn save_template(&self, template: &LetterTemplate) -> Result<()>;

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>>;
    async fn save_employee(&self, employee: &Employee) -> Result<()>;

    async fn get_signature(&self, id: &SignatureId) -> Result<Option<DigitalSignature>>;
    async fn save_signature(&self, signature: &DigitalSignature) -> Result<()>;
    async fn list_signatures(&self) -> Result<Vec<DigitalSignature>>;

    async fn get_letter(&self, id: &LetterId) -> Result<Option<GeneratedLetter>>;
    async fn list_letters(&self) -> Result<Vec<GeneratedLetter>>;

    /// Persist a new letter together with its first history entry.
    /// Fails with `Conflict` if the id is already taken.
    async fn insert_letter(&self, letter: &GeneratedLetter, initial: &StatusHistoryEntry) -> Result<()>;

    /// Replace a stored letter if its stored version equals `expected_version`,
    /// appending `entry` to its history in the same write. Fails with
    /// `Conflict` on a version mismatch and `NotFound` for unknown letters.
    async fn commit_letter(
        &self,
        letter: &GeneratedLetter,
        expected_version: u64,
        entry: Option<&StatusHistoryEntry>,
    ) -> Result<()>;

    /// History entries for a letter ordered by `changed_at`
    async fn history(&self, letter_id: &LetterId) -> Result<Vec<StatusHistoryEntry>>;

    /// Issue the next sequence value for a letter type, starting at 1
    async fn next_sequence(&self, letter_type: &str) -> Result<u64>;

    /// Store rendered document bytes and return the reference to keep on the letter
    async fn save_rendered(&self, file_name: &str, bytes: &[u8]) -> Result<String>;
    async fn load_file(&self, reference: &str) -> Result<Vec<u8>>;

    async fn save_bulk_operation(&self, operation: &BulkOperation) -> Result<()>;
    async fn get_bulk_operation(&self, id: &BulkOperationId) -> Result<Option<BulkOperation>>;
    async fn list_bulk_operations(&self) -> Result<Vec<BulkOperation>>;

    /// Letters for one employee and template, newest first
    async fn find_letters(
        &self,
        template_id: &TemplateId,
        employee_id: &EmployeeId,
    ) -> Result<Vec<GeneratedLetter>> {
        let mut letters: Vec<GeneratedLetter> = self
            .list_letters()
            .await?
            .into_iter()
            .filter(|l| &l.template_id == template_id && &l.employee_id == employee_id)
            .collect();
        letters.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        Ok(letters)
    }

    async fn find_letter_by_message_id(&self, message_id: &str) -> Result<Option<GeneratedLetter>> {
        Ok(self
            .list_letters()
            .await?
            .into_iter()
            .find(|l| l.email_message_id.as_deref() == Some(message_id)))
    }

    async fn count_letters_by_status(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts: BTreeMap<String, usize> = LetterStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for letter in self.list_letters().await? {
            *counts.entry(letter.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
