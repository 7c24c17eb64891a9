//! Request-level error taxonomy.
//!
//! Plumbing (store, providers, config) returns `anyhow::Result`. Anything a
//! request handler can surface is narrowed into [`ChatError`], whose variant
//! decides the HTTP status and how much detail reaches the caller.

use thiserror::Error;

use crate::inference::InferenceError;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing or malformed input. Rejected before any side effect.
    #[error("{0}")]
    Validation(String),

    /// A user-scoped lookup (project, session, document) found nothing.
    #[error("{0}")]
    NotFound(String),

    /// Missing or invalid bearer key.
    #[error("{0}")]
    Unauthorized(String),

    /// The model backend failed. Its status text is passed through.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Store or retrieval failure. Logged in full, reported generically.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ChatError::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ChatError::Unauthorized(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) => 400,
            ChatError::Unauthorized(_) => 401,
            ChatError::NotFound(_) => 404,
            ChatError::Inference(_) => 502,
            ChatError::Internal(_) => 500,
        }
    }

    /// Message safe to show the caller.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ChatError::validation("x").status_code(), 400);
        assert_eq!(ChatError::unauthorized("x").status_code(), 401);
        assert_eq!(ChatError::not_found("x").status_code(), 404);
        assert_eq!(
            ChatError::from(anyhow::anyhow!("db down")).status_code(),
            500
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = ChatError::from(anyhow::anyhow!("disk I/O error at /var/db"));
        assert_eq!(err.public_message(), "Internal server error");
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_inference_detail_is_passed_through() {
        let err = ChatError::from(InferenceError::Status {
            status: 503,
            status_text: "Service Unavailable".into(),
            body: "model not loaded".into(),
        });
        let msg = err.public_message();
        assert!(msg.contains("Service Unavailable"));
        assert!(msg.contains("model not loaded"));
    }
}
