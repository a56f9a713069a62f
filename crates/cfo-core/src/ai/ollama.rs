//! Ollama backend implementation
//!
//! HTTP client for the Ollama generate API. Uses the model router for
//! per-task model selection and the prompt library for templates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model_router::{ModelRouter, TaskType};
use crate::models::{AlertType, StatementPeriod};
use crate::prompts::{PromptId, PromptLibrary};
use crate::trends::SynthesisDigest;

use super::parsing::{parse_classification, parse_extraction, parse_synthesis};
use super::types::{ClassificationRequest, RawExtraction, RawSynthesis, RouterInfo};
use super::AIBackend;

/// Ollama backend with model router integration
///
/// Configure routing via `~/.local/share/cfo/config/models.toml`:
///
/// ```toml
/// [defaults]
/// model = "llama3.2"
///
/// [models.extraction]
/// model = "qwen2.5:14b"
/// timeout_secs = 180
/// ```
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    router: Arc<RwLock<ModelRouter>>,
    default_model: String,
    prompts: Arc<RwLock<PromptLibrary>>,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, default_model: &str) -> Self {
        let mut router = ModelRouter::default();
        router.set_default_model(default_model);
        Self::with_router(base_url, default_model, router)
    }

    /// Create with a custom router
    pub fn with_router(base_url: &str, default_model: &str, router: ModelRouter) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            router: Arc::new(RwLock::new(router)),
            default_model: default_model.to_string(),
            prompts: Arc::new(RwLock::new(PromptLibrary::new())),
        }
    }

    /// Use embedded prompts only, ignoring override files
    pub fn with_embedded_prompts(mut self) -> Self {
        self.prompts = Arc::new(RwLock::new(PromptLibrary::embedded_only()));
        self
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        Some(Self::new(&host, &model))
    }

    fn render(&self, id: PromptId, vars: &HashMap<&str, &str>) -> Result<String> {
        let mut prompts = self
            .prompts
            .write()
            .map_err(|_| Error::InvalidData("Failed to acquire prompt library lock".into()))?;
        Ok(prompts.get(id)?.render_combined(vars))
    }

    fn model_for(&self, task: TaskType) -> String {
        self.router
            .read()
            .map(|r| r.model_for_task(task).to_string())
            .unwrap_or_else(|_| self.default_model.clone())
    }

    fn record(&self, model: &str, ok: bool) {
        if let Ok(mut router) = self.router.write() {
            if ok {
                router.record_success(model);
            } else if router.record_failure(model) {
                warn!(model = %model, "Model marked unhealthy after repeated failures");
            }
        }
    }

    /// Send a prompt and return the raw model output
    async fn generate(&self, task: TaskType, prompt: String) -> Result<String> {
        let model = self.model_for(task);
        let request = OllamaRequest {
            model: model.clone(),
            prompt,
            stream: false,
            format: "json",
        };

        let result = async {
            let response = self
                .http_client
                .post(format!("{}/api/generate", self.base_url))
                .json(&request)
                .send()
                .await?
                .error_for_status()?;
            let body: OllamaResponse = response.json().await?;
            Ok::<_, Error>(body.response)
        }
        .await;

        self.record(&model, result.is_ok());
        let output = result?;
        debug!(task = task.as_str(), model = %model, "Ollama response: {}", output);
        Ok(output)
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

pub(crate) fn period_hint_text(hint: Option<&StatementPeriod>) -> String {
    hint.map(|p| format!("{} to {}", p.start, p.end))
        .unwrap_or_default()
}

pub(crate) fn alert_type_listing() -> String {
    AlertType::all()
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn extract_transactions(
        &self,
        text: &str,
        hint: Option<&StatementPeriod>,
    ) -> Result<RawExtraction> {
        let hint_text = period_hint_text(hint);
        let mut vars = HashMap::new();
        vars.insert("text", text);
        vars.insert("period_hint", hint_text.as_str());
        let prompt = self.render(PromptId::ExtractTransactions, &vars)?;

        let output = self.generate(TaskType::Extraction, prompt).await?;
        parse_extraction(&output)
    }

    async fn classify_transaction(&self, request: &ClassificationRequest<'_>) -> Result<i64> {
        let amount = format!("{:.2}", request.amount);
        let categories = request.category_listing();
        let mut vars = HashMap::new();
        vars.insert("description", request.description);
        vars.insert("amount", amount.as_str());
        vars.insert("currency", request.currency);
        vars.insert("categories", categories.as_str());
        let prompt = self.render(PromptId::ClassifyTransaction, &vars)?;

        let output = self.generate(TaskType::Classification, prompt).await?;
        parse_classification(&output)
    }

    async fn synthesize_insights(&self, digest: &SynthesisDigest) -> Result<RawSynthesis> {
        let analysis = serde_json::to_string_pretty(digest)?;
        let alert_types = alert_type_listing();
        let mut vars = HashMap::new();
        vars.insert("analysis", analysis.as_str());
        vars.insert("alert_types", alert_types.as_str());
        let prompt = self.render(PromptId::SynthesizeInsights, &vars)?;

        let output = self.generate(TaskType::Synthesis, prompt).await?;
        parse_synthesis(&output)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn timeout_for(&self, task: TaskType) -> Duration {
        self.router
            .read()
            .map(|r| r.timeout_for_task(task))
            .unwrap_or(Duration::from_secs(30))
    }

    fn model(&self) -> &str {
        &self.default_model
    }

    fn host(&self) -> &str {
        &self.base_url
    }

    fn router_info(&self) -> RouterInfo {
        match self.router.read() {
            Ok(router) => RouterInfo {
                default_model: router.config().default_model.clone(),
                fallback_model: router.config().fallback_model.clone(),
                task_models: TaskType::all()
                    .iter()
                    .map(|t| (t.as_str().to_string(), router.model_for_task(*t).to_string()))
                    .collect(),
            },
            Err(_) => RouterInfo {
                default_model: self.default_model.clone(),
                fallback_model: None,
                task_models: Vec::new(),
            },
        }
    }
}
