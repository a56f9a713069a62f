//! CFO Core Library
//!
//! Statement processing pipeline for the personal CFO tool:
//! - Document text extraction (PDF, plain text, CSV)
//! - Transaction extraction with an intelligence service and a line-pattern fallback
//! - Keyword-first category resolution with classification fallback
//! - Per-statement state machine with single-flight locking and retries
//! - Per-currency trend analysis, alerts and monitoring rules
//! - Encrypted SQLite storage with batch-atomic commits
//! - Pluggable AI backends (Ollama, OpenAI-compatible, mock)
//! - Model router and prompt library for task-based model selection

pub mod ai;
pub mod categorize;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod extract;
pub mod model_router;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod state;
pub mod storage;
pub mod trends;

/// Test utilities including the mock intelligence server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{
    AIBackend, AIClient, ClassificationRequest, MockBackend, OllamaBackend,
    OpenAICompatibleBackend, RouterInfo,
};
pub use categorize::{CategoryResolver, CategorySnapshot, Resolution};
pub use config::PipelineConfig;
pub use db::Database;
pub use error::{Error, Result};
pub use extract::{ExtractionOutcome, TransactionExtractor};
pub use model_router::{ModelRouter, RouterConfig, TaskConfig, TaskType};
pub use pipeline::{
    CategorizeReport, ExtractReport, Insights, Pipeline, ProcessOptions, ProcessReport, StageReport,
};
pub use prompts::{Prompt, PromptId, PromptLibrary};
pub use state::{CancellationFlag, StateMachine};
pub use storage::Storage;
pub use trends::{TrendAnalysis, TrendEngine, TrendReport};
