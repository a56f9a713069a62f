//! Intelligence-service abstraction
//!
//! The pipeline uses three capabilities: transaction extraction, transaction
//! classification and insight synthesis. Every call is fallible and has its
//! own timeout; callers decide the fallback path.
//!
//! # Architecture
//!
//! - `AIBackend` trait: the interface every backend implements
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OllamaBackend`, `OpenAICompatibleBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (ollama, openai_compatible, mock). Default: ollama
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Default model name (default: llama3.2)
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required for openai_compatible backend)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: gpt-3.5-turbo)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)

mod mock;
mod ollama;
mod openai_compatible;
pub mod parsing;
pub mod types;

pub use mock::{MockBackend, MockCalls};
pub use ollama::OllamaBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use types::*;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model_router::TaskType;
use crate::models::StatementPeriod;
use crate::trends::SynthesisDigest;

/// Interface for intelligence-service backends
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Extract every transaction and the billing period from statement text
    async fn extract_transactions(
        &self,
        text: &str,
        hint: Option<&StatementPeriod>,
    ) -> Result<RawExtraction>;

    /// Pick one of the supplied category ids for a transaction
    async fn classify_transaction(&self, request: &ClassificationRequest<'_>) -> Result<i64>;

    /// Turn a numeric analysis into alert narratives and recommendations
    async fn synthesize_insights(&self, digest: &SynthesisDigest) -> Result<RawSynthesis>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Per-call timeout for a capability
    fn timeout_for(&self, task: TaskType) -> Duration;

    /// Get the model name (for logging)
    fn model(&self) -> &str;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;

    /// Get router configuration info
    fn router_info(&self) -> RouterInfo;
}

/// Concrete AI client enum
///
/// Errors from every variant come back as `Error::IntelligenceService`.
#[derive(Clone)]
pub enum AIClient {
    /// Ollama backend (HTTP API)
    Ollama(OllamaBackend),
    /// OpenAI-compatible backend (vLLM, LocalAI, llama-server, etc.)
    OpenAICompatible(OpenAICompatibleBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("AI_BACKEND").unwrap_or_else(|_| "ollama".to_string());

        match backend.to_lowercase().as_str() {
            "ollama" => OllamaBackend::from_env().map(AIClient::Ollama),
            "openai_compatible" | "openai" | "vllm" | "localai" | "llamacpp" => {
                OpenAICompatibleBackend::from_env().map(AIClient::OpenAICompatible)
            }
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to ollama");
                OllamaBackend::from_env().map(AIClient::Ollama)
            }
        }
    }

    /// Create an Ollama backend directly
    pub fn ollama(host: &str, model: &str) -> Self {
        AIClient::Ollama(OllamaBackend::new(host, model))
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }

    fn backend(&self) -> &dyn AIBackend {
        match self {
            AIClient::Ollama(b) => b,
            AIClient::OpenAICompatible(b) => b,
            AIClient::Mock(b) => b,
        }
    }
}

impl From<MockBackend> for AIClient {
    fn from(mock: MockBackend) -> Self {
        AIClient::Mock(mock)
    }
}

#[async_trait]
impl AIBackend for AIClient {
    async fn extract_transactions(
        &self,
        text: &str,
        hint: Option<&StatementPeriod>,
    ) -> Result<RawExtraction> {
        self.backend()
            .extract_transactions(text, hint)
            .await
            .map_err(Error::into_intelligence)
    }

    async fn classify_transaction(&self, request: &ClassificationRequest<'_>) -> Result<i64> {
        self.backend()
            .classify_transaction(request)
            .await
            .map_err(Error::into_intelligence)
    }

    async fn synthesize_insights(&self, digest: &SynthesisDigest) -> Result<RawSynthesis> {
        self.backend()
            .synthesize_insights(digest)
            .await
            .map_err(Error::into_intelligence)
    }

    async fn health_check(&self) -> bool {
        self.backend().health_check().await
    }

    fn timeout_for(&self, task: TaskType) -> Duration {
        self.backend().timeout_for(task)
    }

    fn model(&self) -> &str {
        self.backend().model()
    }

    fn host(&self) -> &str {
        self.backend().host()
    }

    fn router_info(&self) -> RouterInfo {
        self.backend().router_info()
    }
}

/// Run one intelligence call under its task timeout
///
/// A timeout is reported as `IntelligenceService` like any other failure.
pub async fn with_timeout<T, F>(ai: &AIClient, task: TaskType, call: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let limit = ai.timeout_for(task);
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::IntelligenceService(format!(
            "{} call timed out after {:?}",
            task.as_str(),
            limit
        ))),
    }
}
