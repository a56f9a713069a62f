//! OpenAI-compatible backend implementation
//!
//! Works with any server that implements the OpenAI chat completions API
//! (vLLM, LocalAI, llama-server, text-generation-inference).
//!
//! # Configuration
//!
//! Environment variables:
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: gpt-3.5-turbo)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model_router::{ModelRouter, TaskType};
use crate::models::StatementPeriod;
use crate::prompts::{PromptId, PromptLibrary};
use crate::trends::SynthesisDigest;

use super::ollama::{alert_type_listing, period_hint_text};
use super::parsing::{parse_classification, parse_extraction, parse_synthesis};
use super::types::{ClassificationRequest, RawExtraction, RawSynthesis, RouterInfo};
use super::AIBackend;

/// OpenAI-compatible backend
#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    router: Arc<RwLock<ModelRouter>>,
    prompts: Arc<RwLock<PromptLibrary>>,
}

impl OpenAICompatibleBackend {
    /// Create a new OpenAI-compatible backend
    pub fn new(base_url: &str, model: &str) -> Self {
        let mut router = ModelRouter::default();
        router.set_default_model(model);
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
            router: Arc::new(RwLock::new(router)),
            prompts: Arc::new(RwLock::new(PromptLibrary::new())),
        }
    }

    /// Attach a bearer token
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Create from environment variables
    ///
    /// Required: `OPENAI_COMPATIBLE_HOST`
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OPENAI_COMPATIBLE_HOST").ok()?;
        let model = std::env::var("OPENAI_COMPATIBLE_MODEL")
            .unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let backend = Self::new(&host, &model);
        Some(match std::env::var("OPENAI_COMPATIBLE_API_KEY") {
            Ok(key) => backend.with_api_key(&key),
            Err(_) => backend,
        })
    }

    fn render(&self, id: PromptId, vars: &HashMap<&str, &str>) -> Result<(String, String)> {
        let mut prompts = self
            .prompts
            .write()
            .map_err(|_| Error::InvalidData("Failed to acquire prompt library lock".into()))?;
        let prompt = prompts.get(id)?;
        Ok((prompt.render_system(vars), prompt.render_user(vars)))
    }

    async fn chat(&self, task: TaskType, system: String, user: String) -> Result<String> {
        let model = self
            .router
            .read()
            .map(|r| r.model_for_task(task).to_string())
            .unwrap_or_else(|_| self.model.clone());

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let request = ChatRequest {
            model: model.clone(),
            messages,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let result = async {
            let mut builder = self
                .http_client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .json(&request);
            if let Some(ref key) = self.api_key {
                builder = builder.bearer_auth(key);
            }
            let response: ChatResponse = builder.send().await?.error_for_status()?.json().await?;
            response
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| Error::InvalidData("Chat completion returned no choices".into()))
        }
        .await;

        if let Ok(mut router) = self.router.write() {
            if result.is_ok() {
                router.record_success(&model);
            } else if router.record_failure(&model) {
                warn!(model = %model, "Model marked unhealthy after repeated failures");
            }
        }

        let content = result?;
        debug!(task = task.as_str(), model = %model, "Chat completion: {}", content);
        Ok(content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl AIBackend for OpenAICompatibleBackend {
    async fn extract_transactions(
        &self,
        text: &str,
        hint: Option<&StatementPeriod>,
    ) -> Result<RawExtraction> {
        let hint_text = period_hint_text(hint);
        let mut vars = HashMap::new();
        vars.insert("text", text);
        vars.insert("period_hint", hint_text.as_str());
        let (system, user) = self.render(PromptId::ExtractTransactions, &vars)?;

        let output = self.chat(TaskType::Extraction, system, user).await?;
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
        let (system, user) = self.render(PromptId::ClassifyTransaction, &vars)?;

        let output = self.chat(TaskType::Classification, system, user).await?;
        parse_classification(&output)
    }

    async fn synthesize_insights(&self, digest: &SynthesisDigest) -> Result<RawSynthesis> {
        let analysis = serde_json::to_string_pretty(digest)?;
        let alert_types = alert_type_listing();
        let mut vars = HashMap::new();
        vars.insert("analysis", analysis.as_str());
        vars.insert("alert_types", alert_types.as_str());
        let (system, user) = self.render(PromptId::SynthesizeInsights, &vars)?;

        let output = self.chat(TaskType::Synthesis, system, user).await?;
        parse_synthesis(&output)
    }

    async fn health_check(&self) -> bool {
        let mut builder = self.http_client.get(format!("{}/v1/models", self.base_url));
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
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
        &self.model
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
                default_model: self.model.clone(),
                fallback_model: None,
                task_models: Vec::new(),
            },
        }
    }
}
