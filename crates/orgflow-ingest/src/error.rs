//! Pipeline error types

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy shared by every stage
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Local source file missing. Fatal, raised before any transfer.
    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Object-store operation failed; retryable by the scheduler
    #[error("Transfer failed for '{key}': {message}")]
    Transfer { key: String, message: String },

    /// Download target key is absent (broken or already consumed artifact reference)
    #[error("Artifact not found in object store: {0}")]
    NotFound(String),

    #[error("Malformed source document: {0}")]
    MalformedDocument(#[from] serde_json::Error),

    /// Relational insert or table preparation failed
    #[error("Load into {table} failed: {message}")]
    Load { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// The run-scoped handoff channel failed or holds nothing for the run
    #[error("Handoff error: {0}")]
    Handoff(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn transfer(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transfer {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn handoff(message: impl Into<String>) -> Self {
        Self::Handoff(message.into())
    }

    /// Whether the external scheduler may retry the failed stage as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transfer { .. } | PipelineError::Load { .. } | PipelineError::Handoff(_)
        )
    }

    /// Short machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceNotFound(_) => "source_not_found",
            PipelineError::Transfer { .. } => "transfer_error",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::MalformedDocument(_) => "malformed_document",
            PipelineError::Load { .. } => "load_error",
            PipelineError::Config(_) => "config_error",
            PipelineError::Handoff(_) => "handoff_error",
            PipelineError::Io(_) => "io_error",
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::transfer("k", "timeout").is_retryable());
        assert!(PipelineError::load("public.t", "connection reset").is_retryable());
        assert!(!PipelineError::NotFound("k".into()).is_retryable());
        assert!(!PipelineError::SourceNotFound(PathBuf::from("/x.json")).is_retryable());
        assert!(!PipelineError::config("missing host").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = PipelineError::transfer("incoming/data.json", "access denied");
        assert_eq!(
            err.to_string(),
            "Transfer failed for 'incoming/data.json': access denied"
        );
        assert_eq!(err.kind(), "transfer_error");
    }
}
