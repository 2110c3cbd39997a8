//! Error types for the letter workflow engine

use letter_types::{LetterId, LetterStatus};
use thiserror::Error;

/// Main error type for all letter workflow operations
#[derive(Error, Debug)]
pub enum LetterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("No active digital signature available")]
    NoSignatureAvailable,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: LetterStatus, to: LetterStatus },

    #[error("Render failed: {0}")]
    RenderFailure(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Retry limit exceeded for letter {letter_id} ({attempts} of {max_retries} retries used)")]
    RetryLimitExceeded {
        letter_id: LetterId,
        attempts: u32,
        max_retries: u32,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse classification used by callers that map errors to responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    RenderFailure,
    DispatchFailure,
    Conflict,
    RetryLimitExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::RenderFailure => "render_failure",
            Self::DispatchFailure => "dispatch_failure",
            Self::Conflict => "conflict",
            Self::RetryLimitExceeded => "retry_limit_exceeded",
            Self::Internal => "internal",
        }
    }
}

impl LetterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_)
            | Self::MissingRequiredField(_)
            | Self::UnknownField(_)
            | Self::InvalidFieldValue { .. }
            | Self::NoSignatureAvailable
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::RenderFailure(_) => ErrorKind::RenderFailure,
            Self::DispatchFailure(_) => ErrorKind::DispatchFailure,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RetryLimitExceeded { .. } => ErrorKind::RetryLimitExceeded,
            Self::Http(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for letter workflow operations
pub type Result<T> = std::result::Result<T, LetterError>;
