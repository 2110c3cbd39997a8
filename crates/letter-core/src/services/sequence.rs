//! Letter numbering

use crate::error::Result;
use crate::store::LetterStore;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

/// Issues `{TYPE_CODE}-{YYYY}-{seq:06}` numbers from the store's per-type sequence
pub struct LetterNumberSequence {
    store: Arc<dyn LetterStore>,
}

impl LetterNumberSequence {
    pub fn new(store: Arc<dyn LetterStore>) -> Self {
        Self { store }
    }

    pub async fn next_number(&self, letter_type: &str, at: DateTime<Utc>) -> Result<String> {
        let code = type_code(letter_type);
        let seq = self.store.next_sequence(&code).await?;
        Ok(format_number(&code, at.year(), seq))
    }
}

/// Upper-cased letter type with non-alphanumerics replaced by `_`
pub fn type_code(letter_type: &str) -> String {
    let code: String = letter_type
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    if code.is_empty() {
        "LETTER".to_string()
    } else {
        code
    }
}

pub fn format_number(code: &str, year: i32, seq: u64) -> String {
    format!("{}-{}-{:06}", code, year, seq)
}
