//! Digital signature selection

use crate::error::{LetterError, Result};
use crate::store::LetterStore;
use letter_types::{DigitalSignature, SignatureId};
use std::sync::Arc;

pub struct SignatureSelector {
    store: Arc<dyn LetterStore>,
}

impl SignatureSelector {
    pub fn new(store: Arc<dyn LetterStore>) -> Self {
        Self { store }
    }

    /// Pick the requested signature, or the latest active one when none is given.
    ///
    /// "Latest" is the most recently created active signature; ties go to
    /// the lowest sort order.
    pub async fn select(&self, requested: Option<&SignatureId>) -> Result<DigitalSignature> {
        if let Some(id) = requested {
            let signature = self
                .store
                .get_signature(id)
                .await?
                .ok_or_else(|| LetterError::NotFound(format!("Signature {}", id)))?;

            if !signature.is_active {
                return Err(LetterError::Validation(format!("Signature {} is inactive", id)));
            }
            return Ok(signature);
        }

        self.store
            .list_signatures()
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| b.sort_order.cmp(&a.sort_order))
            })
            .ok_or(LetterError::NoSignatureAvailable)
    }
}
