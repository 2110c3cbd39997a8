//! HTTP API over the letter workflow

use crate::error::ApiError;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use letter_core::{HealthStatus, LetterError, LetterWorkflow};
use letter_types::{
    BatchStatusResult, BatchStatusUpdateRequest, BoundFields, BulkOperation, BulkOperationId,
    BulkRequest, BulkRetryRequest, DeliveryEvent, EmployeeId, GenerateRequest, GeneratedLetter,
    LetterId, RetryResult, SignatureId, StatusHistoryEntry, StatusUpdateRequest, TemplateId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

type AppState = Arc<LetterWorkflow>;
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Rendered preview returned instead of a persisted letter
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub template_id: TemplateId,
    pub employee_id: EmployeeId,
    pub signature_id: SignatureId,
    pub file_name: String,
    pub content_base64: String,
    pub bound_fields: BoundFields,
}

pub fn router(workflow: Arc<LetterWorkflow>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/letters/generate", post(generate_letter))
        .route("/api/letters/preview", post(preview_letter))
        .route("/api/letters/generate-bulk", post(generate_bulk))
        .route("/api/letters/bulk-status/:id", get(bulk_status))
        .route("/api/letters/bulk-operations", get(list_bulk_operations))
        .route("/api/letters/bulk-cancel/:id", post(cancel_bulk))
        .route("/api/letters/bulk-retry/:id", post(retry_bulk))
        .route("/api/letters/send/:id", post(send_letter))
        .route("/api/letters/letter-status/:id", put(update_letter_status))
        .route("/api/letters/letter-status-batch", put(update_letter_status_batch))
        .route("/api/letters/letter-status-history/:id", get(letter_status_history))
        .route("/api/letters/resend/:id", post(resend_letter))
        .route("/api/letters/:id", get(get_letter))
        .route("/api/webhooks/delivery", post(delivery_webhook))
        .with_state(workflow)
}

async fn health(State(workflow): State<AppState>) -> ApiResult<Value> {
    let report = workflow.health_check().await?;
    let status = match report.status {
        HealthStatus::Healthy => "ok",
        HealthStatus::Degraded => "degraded",
    };

    Ok(Json(json!({
        "status": status,
        "letters_by_status": report.letters_by_status,
        "running_operations": report.running_operations,
        "checked_at": report.checked_at,
    })))
}

async fn generate_letter(
    State(workflow): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<GeneratedLetter> {
    let Json(request) = payload?;
    let letter = workflow.generate(&request).await?;
    Ok(Json(letter))
}

async fn preview_letter(
    State(workflow): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<PreviewResponse> {
    let Json(request) = payload?;
    let preview = workflow.preview(&request).await?;

    Ok(Json(PreviewResponse {
        template_id: preview.template.id,
        employee_id: preview.employee.id.clone(),
        signature_id: preview.signature.id,
        file_name: format!("preview-{}.pdf", preview.employee.employee_code),
        content_base64: BASE64.encode(&preview.content),
        bound_fields: preview.bound_fields,
    }))
}

async fn generate_bulk(
    State(workflow): State<AppState>,
    payload: Result<Json<BulkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BulkOperation>), ApiError> {
    let Json(request) = payload?;
    let operation = workflow.run_bulk(request).await?;
    Ok((StatusCode::ACCEPTED, Json(operation)))
}

async fn bulk_status(
    State(workflow): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BulkOperation> {
    let operation = workflow.bulk_status(&BulkOperationId::new(id)).await?;
    Ok(Json(operation))
}

async fn list_bulk_operations(State(workflow): State<AppState>) -> ApiResult<Vec<BulkOperation>> {
    Ok(Json(workflow.list_bulk_operations().await?))
}

async fn cancel_bulk(State(workflow): State<AppState>, Path(id): Path<String>) -> ApiResult<bool> {
    let cancelled = workflow.cancel_bulk(&BulkOperationId::new(id)).await?;
    Ok(Json(cancelled))
}

/// The body is optional; an empty body retries every failed item
async fn retry_bulk(
    State(workflow): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<RetryResult> {
    let request: BulkRetryRequest = if body.iter().all(u8::is_ascii_whitespace) {
        BulkRetryRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid retry request: {}", e)))?
    };

    let result = workflow
        .retry_bulk(&BulkOperationId::new(id), request.item_ids.as_deref())
        .await?;
    Ok(Json(result))
}

async fn send_letter(State(workflow): State<AppState>, Path(id): Path<String>) -> ApiResult<GeneratedLetter> {
    let letter = workflow.send(&LetterId::new(id), None).await?;
    Ok(Json(letter))
}

async fn update_letter_status(
    State(workflow): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> ApiResult<bool> {
    let Json(request) = payload?;
    workflow
        .update_status(
            &LetterId::new(id),
            request.new_status,
            request.notes,
            request.actor.as_deref(),
        )
        .await?;
    Ok(Json(true))
}

async fn update_letter_status_batch(
    State(workflow): State<AppState>,
    payload: Result<Json<BatchStatusUpdateRequest>, JsonRejection>,
) -> ApiResult<BatchStatusResult> {
    let Json(request) = payload?;
    let result = workflow
        .update_status_batch(
            &request.letter_ids,
            request.new_status,
            request.notes,
            request.actor.as_deref(),
        )
        .await;
    Ok(Json(result))
}

async fn letter_status_history(
    State(workflow): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<StatusHistoryEntry>> {
    Ok(Json(workflow.history(&LetterId::new(id)).await?))
}

/// `false` when the mail provider rejected the message again; the letter
/// stays `Failed` with the new error recorded
async fn resend_letter(State(workflow): State<AppState>, Path(id): Path<String>) -> ApiResult<bool> {
    match workflow.resend(&LetterId::new(id), None).await {
        Ok(_) => Ok(Json(true)),
        Err(LetterError::DispatchFailure(reason)) => {
            log::warn!("Resend failed: {}", reason);
            Ok(Json(false))
        }
        Err(e) => Err(e.into()),
    }
}

async fn get_letter(State(workflow): State<AppState>, Path(id): Path<String>) -> ApiResult<GeneratedLetter> {
    Ok(Json(workflow.get_letter(&LetterId::new(id)).await?))
}

async fn delivery_webhook(
    State(workflow): State<AppState>,
    payload: Result<Json<DeliveryEvent>, JsonRejection>,
) -> ApiResult<GeneratedLetter> {
    let Json(event) = payload?;
    let letter = workflow.record_delivery_event(&event).await?;
    Ok(Json(letter))
}
