//! HTTP error mapping for the letter API

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use letter_core::{ErrorKind, LetterError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Letter(#[from] LetterError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            ApiError::Letter(e) => {
                let kind = e.kind();
                let status = match kind {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::RetryLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
                    ErrorKind::RenderFailure | ErrorKind::DispatchFailure => StatusCode::BAD_GATEWAY,
                    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, kind.as_str())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Internal error: {}", self);
            "Internal error".to_string()
        } else {
            log::warn!("Request failed ({}): {}", status.as_u16(), self);
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use letter_types::{LetterId, LetterStatus};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LetterError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LetterError::MissingRequiredField("Amount".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                LetterError::InvalidTransition {
                    from: LetterStatus::Generated,
                    to: LetterStatus::Delivered,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LetterError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                LetterError::RetryLimitExceeded {
                    letter_id: LetterId::new("l-1"),
                    attempts: 3,
                    max_retries: 3,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (LetterError::RenderFailure("x".into()), StatusCode::BAD_GATEWAY),
            (LetterError::DispatchFailure("x".into()), StatusCode::BAD_GATEWAY),
            (LetterError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
