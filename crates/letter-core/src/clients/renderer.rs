//! Document renderer client

use crate::config::RendererConfig;
use crate::error::{LetterError, Result};
use async_trait::async_trait;
use letter_types::BoundFields;
use reqwest::{multipart, Client as HttpClient};
use std::time::Duration;

/// Everything the renderer needs to produce one document
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub template_name: &'a str,
    pub template_content: &'a str,
    pub fields: &'a BoundFields,
    pub signature_image: &'a [u8],
}

/// Turns template content, bound fields and a signature image into file bytes
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Vec<u8>>;
}

/// Renderer backed by the HTTP rendering service
pub struct HttpRenderer {
    config: RendererConfig,
    http_client: HttpClient,
}

impl HttpRenderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LetterError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl DocumentRenderer for HttpRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Vec<u8>> {
        let url = format!("{}/render", self.config.base_url.trim_end_matches('/'));

        let json_data = serde_json::to_string(&request.fields.to_json())
            .map_err(|e| LetterError::Serialization(format!("Failed to serialize field data: {}", e)))?;

        let template_part = multipart::Part::text(request.template_content.to_string())
            .file_name(format!("{}.tmpl", request.template_name))
            .mime_str("text/plain")?;

        let json_part = multipart::Part::text(json_data)
            .file_name("data.json")
            .mime_str("application/json")?;

        let signature_part = multipart::Part::bytes(request.signature_image.to_vec())
            .file_name("signature.png")
            .mime_str("image/png")?;

        let form = multipart::Form::new()
            .part("template", template_part)
            .part("json_data", json_part)
            .part("signature", signature_part);

        log::debug!("Rendering template '{}' with {} fields", request.template_name, request.fields.len());

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LetterError::RenderFailure(format!("Renderer unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

            // The service answers validation problems as {"detail": "..."}
            let detail = serde_json::from_str::<serde_json::Value>(&error_text)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or(error_text);

            return Err(LetterError::RenderFailure(format!(
                "Renderer returned {} - {}",
                status, detail
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LetterError::RenderFailure(format!("Failed to read rendered document: {}", e)))?;

        if bytes.is_empty() {
            return Err(LetterError::RenderFailure("Renderer returned an empty document".to_string()));
        }

        Ok(bytes.to_vec())
    }
}
