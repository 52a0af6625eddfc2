//! Error taxonomy shared by the stores, the pipeline, and the retrieval engine.
//!
//! Only [`StoreError`] crosses component boundaries. [`ProviderError`] is always
//! converted into a fallback value (placeholder embedding, degraded event) by
//! whoever called the provider; secondary-index failures are plain
//! `anyhow::Error`s that the store adapters log and swallow.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::memory::types::RecordKind;

/// One violated field in a [`ValidationError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Input failed schema validation. Carries every violated field, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` if nothing was pushed, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", err.field, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors surfaced by the store adapters and the retrieval engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure of an external provider (embedding, LLM extraction, transcription).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let mut err = ValidationError::new();
        err.push("name", "must not be empty");
        err.push("description", "must be at most 10000 characters");
        let msg = err.to_string();
        assert!(msg.contains("name: must not be empty"));
        assert!(msg.contains("description:"));
        assert_eq!(err.fields(), vec!["name", "description"]);
    }

    #[test]
    fn empty_validation_error_is_ok() {
        assert!(ValidationError::new().into_result().is_ok());
    }

    #[test]
    fn not_found_message_names_kind() {
        let err = StoreError::not_found(RecordKind::Task, "abc");
        assert_eq!(err.to_string(), "task not found: abc");
        assert!(err.is_not_found());
    }
}
