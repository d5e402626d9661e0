//! Error types for opscopilot-core

use std::time::Duration;

use thiserror::Error;

use crate::request::ValidationErrors;
use crate::types::ProviderKind;

/// Main error type for the opscopilot-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The selected backend has no credential configured
    #[error("{message}")]
    ProviderNotConfigured {
        provider: ProviderKind,
        message: String,
    },

    /// Failure reported by an AI backend
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Ticket not found
    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    /// Request failed field validation
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Summary stream did not finish in time
    #[error("stream timeout after {0:?}")]
    Timeout(Duration),
}

/// Failure raised by an AI backend call.
///
/// `status` is the backend's HTTP status when the failure came from a
/// non-2xx response; `message` is the raw text (usually `"<status> <body>"`).
#[derive(Error, Debug, Clone)]
#[error("{provider} backend error: {message}")]
pub struct ProviderError {
    pub provider: ProviderKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(provider: ProviderKind, status: u16, body: &str) -> Self {
        Self {
            provider,
            status: Some(status),
            message: format!("{status} {body}"),
        }
    }
}

/// Result type alias for opscopilot-core
pub type Result<T> = std::result::Result<T, Error>;
