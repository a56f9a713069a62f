//! Error types for the statement pipeline

use thiserror::Error;

use crate::models::{Stage, StatementStatus};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid transition: cannot start {stage} from {from}")]
    InvalidTransition { from: StatementStatus, stage: Stage },

    #[error("Insufficient categories: {have} defined, at least {required} required")]
    InsufficientCategories { have: usize, required: usize },

    #[error("No transactions could be extracted from the statement")]
    ExtractionEmpty,

    #[error("Statement {0} is already being processed")]
    AlreadyInProgress(i64),

    #[error("Retry limit reached for {stage} after {attempts} attempts")]
    RetryLimitExceeded { stage: Stage, attempts: u32 },

    #[error("Processing of statement {0} was cancelled")]
    Cancelled(i64),

    #[error("Intelligence service error: {0}")]
    IntelligenceService(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Stable machine-readable code, persisted with failed statements
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InsufficientCategories { .. } => "insufficient_categories",
            Self::ExtractionEmpty => "extraction_empty",
            Self::AlreadyInProgress(_) => "already_in_progress",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::Cancelled(_) => "cancelled",
            Self::IntelligenceService(_) | Self::Http(_) => "intelligence_service_error",
            Self::Persistence(_) | Self::Database(_) | Self::Pool(_) | Self::Encryption(_) => {
                "persistence_error"
            }
            Self::Document(_) => "document_error",
            Self::Io(_) => "io_error",
            Self::Json(_) | Self::InvalidData(_) | Self::Regex(_) => "invalid_data",
            Self::NotFound(_) => "not_found",
        }
    }

    /// Collapse a storage-level failure into the opaque persistence error.
    /// `NotFound` is kept so callers can still tell a missing row apart.
    pub fn into_persistence(self) -> Self {
        match self {
            Self::NotFound(_) | Self::Persistence(_) => self,
            other => Self::Persistence(other.to_string()),
        }
    }

    /// Wrap a backend failure so raw HTTP/JSON errors never escape the AI layer
    pub fn into_intelligence(self) -> Self {
        match self {
            Self::IntelligenceService(_) => self,
            other => Self::IntelligenceService(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(Error::ExtractionEmpty.kind(), "extraction_empty");
        assert_eq!(Error::AlreadyInProgress(7).kind(), "already_in_progress");
        assert_eq!(
            Error::InsufficientCategories {
                have: 2,
                required: 5
            }
            .kind(),
            "insufficient_categories"
        );
    }

    #[test]
    fn test_into_persistence_keeps_not_found() {
        let err = Error::NotFound("statement 3".into()).into_persistence();
        assert!(matches!(err, Error::NotFound(_)));

        let err = Error::InvalidData("bad row".into()).into_persistence();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(err.kind(), "persistence_error");
    }

    #[test]
    fn test_into_intelligence_wraps_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = Error::from(json_err).into_intelligence();
        assert!(matches!(err, Error::IntelligenceService(_)));
    }
}
