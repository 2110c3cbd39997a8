//! Letter generation: resolve, bind, render, number, persist

use super::field_binder::FieldBinder;
use super::sequence::LetterNumberSequence;
use super::signature_selector::SignatureSelector;
use super::template_resolver::TemplateResolver;
use crate::clients::{DocumentRenderer, RenderRequest};
use crate::error::{LetterError, Result};
use crate::store::LetterStore;
use chrono::Utc;
use letter_types::{
    BoundFields, DigitalSignature, Employee, GenerateRequest, GeneratedLetter, LetterId,
    LetterStatus, LetterTemplate, StatusHistoryEntry,
};
use std::sync::Arc;
use std::time::Duration;

pub const SYSTEM_ACTOR: &str = "system";

/// Rendered document that was not persisted
#[derive(Debug, Clone)]
pub struct LetterPreview {
    pub template: LetterTemplate,
    pub employee: Employee,
    pub signature: DigitalSignature,
    pub bound_fields: BoundFields,
    pub content: Vec<u8>,
}

pub struct LetterGenerator {
    store: Arc<dyn LetterStore>,
    renderer: Arc<dyn DocumentRenderer>,
    resolver: TemplateResolver,
    binder: FieldBinder,
    signatures: SignatureSelector,
    sequence: LetterNumberSequence,
    render_timeout: Duration,
}

impl LetterGenerator {
    pub fn new(
        store: Arc<dyn LetterStore>,
        renderer: Arc<dyn DocumentRenderer>,
        render_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            resolver: TemplateResolver::new(store.clone()),
            binder: FieldBinder::new()?,
            signatures: SignatureSelector::new(store.clone()),
            sequence: LetterNumberSequence::new(store.clone()),
            store,
            renderer,
            render_timeout,
        })
    }

    /// Resolve and render without persisting anything or consuming a number
    pub async fn preview(&self, request: &GenerateRequest) -> Result<LetterPreview> {
        let template = self.resolver.resolve(&request.template_id).await?;
        let employee = self.resolver.resolve_employee(&request.employee_id).await?;
        let signature = self.signatures.select(request.signature_id.as_ref()).await?;
        let bound_fields = self.binder.bind(&template, &employee, &request.field_values)?;

        let content = self.render(&template, &bound_fields, &signature).await?;

        Ok(LetterPreview {
            template,
            employee,
            signature,
            bound_fields,
            content,
        })
    }

    /// Generate, number and persist a letter in `Generated` state
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedLetter> {
        let preview = self.preview(request).await?;

        let generated_at = Utc::now();
        let letter_number = self
            .sequence
            .next_number(&preview.template.letter_type, generated_at)
            .await?;
        let rendered_file = self
            .store
            .save_rendered(&format!("{}.pdf", letter_number), &preview.content)
            .await?;

        let letter = GeneratedLetter {
            id: LetterId::generate(),
            letter_number,
            letter_type: preview.template.letter_type.clone(),
            template_id: preview.template.id.clone(),
            employee_id: preview.employee.id.clone(),
            signature_id: preview.signature.id.clone(),
            fields: preview.bound_fields,
            rendered_file,
            status: LetterStatus::Generated,
            generated_at,
            sent_at: None,
            delivered_at: None,
            last_retry_at: None,
            email_message_id: None,
            error_message: None,
            retry_count: 0,
            version: 1,
        };

        let actor = request.actor.as_deref().unwrap_or(SYSTEM_ACTOR);
        let initial = StatusHistoryEntry::new(letter.id.clone(), None, LetterStatus::Generated, actor, None);
        self.store.insert_letter(&letter, &initial).await?;

        log::info!(
            "Generated letter {} for employee {} from template {}",
            letter.letter_number,
            letter.employee_id,
            letter.template_id
        );
        Ok(letter)
    }

    async fn render(
        &self,
        template: &LetterTemplate,
        fields: &BoundFields,
        signature: &DigitalSignature,
    ) -> Result<Vec<u8>> {
        let signature_image = self
            .store
            .load_file(&signature.image_reference)
            .await
            .map_err(|e| {
                LetterError::RenderFailure(format!(
                    "Signature image for {} unavailable: {}",
                    signature.authority_name, e
                ))
            })?;

        let request = RenderRequest {
            template_name: &template.name,
            template_content: &template.content,
            fields,
            signature_image: &signature_image,
        };

        match tokio::time::timeout(self.render_timeout, self.renderer.render(request)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(LetterError::RenderFailure(msg))) => Err(LetterError::RenderFailure(msg)),
            Ok(Err(e)) => Err(LetterError::RenderFailure(e.to_string())),
            Err(_) => Err(LetterError::RenderFailure(format!(
                "Renderer timed out after {}s",
                self.render_timeout.as_secs_f32()
            ))),
        }
    }
}
