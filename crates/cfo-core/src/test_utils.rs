//! Test utilities for cfo-core
//!
//! Provides a mock intelligence server speaking the Ollama `/api/generate`
//! and `/api/tags` protocol, for HTTP-level backend tests and local development.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;

use crate::extract::parse_lines;

/// How the mock answers generate requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// Answer every capability with plausible JSON
    Healthy,
    /// Answer every generate call with HTTP 500
    Failing,
    /// Answer with text that is not JSON
    Garbage,
}

#[derive(Clone)]
struct MockState {
    mode: MockMode,
    requests: Arc<AtomicUsize>,
}

/// Mock intelligence server for testing and development
pub struct MockIntelligenceServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockIntelligenceServer {
    /// Start a healthy mock server on an available port
    pub async fn start() -> Self {
        Self::start_with(MockMode::Healthy).await
    }

    pub async fn start_with(mode: MockMode) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));
        let state = MockState {
            mode,
            requests: requests.clone(),
        };
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Generate requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockIntelligenceServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tags endpoint (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "llama3.2:latest".to_string(),
            modified_at: "2025-01-01T00:00:00Z".to_string(),
            size: 4_000_000_000,
        }],
    })
}

/// Generate endpoint
async fn handle_generate(
    State(state): State<MockState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, StatusCode> {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let response = match state.mode {
        MockMode::Failing => return Err(StatusCode::INTERNAL_SERVER_ERROR),
        MockMode::Garbage => "I could not find any transactions, sorry!".to_string(),
        // These markers match the prompt files in prompts/*.md
        MockMode::Healthy if request.prompt.contains("Statement text:") => {
            extraction_mock(&request.prompt)
        }
        MockMode::Healthy if request.prompt.contains("Categories (id: name):") => {
            classification_mock(&request.prompt)
        }
        MockMode::Healthy => synthesis_mock(),
    };

    Ok(Json(GenerateResponse {
        model: request.model,
        response,
        done: true,
    }))
}

/// Line-by-line extraction of the statement text in the prompt
fn extraction_mock(prompt: &str) -> String {
    let text = prompt
        .split_once("Statement text:")
        .map(|(_, text)| text)
        .unwrap_or_default();
    let (drafts, _) = parse_lines(text);

    let transactions: Vec<_> = drafts
        .iter()
        .map(|d| {
            let amount = if d.credit {
                format!("-{}", d.amount)
            } else {
                d.amount.clone()
            };
            json!({
                "date": d.date,
                "description": d.description,
                "amount": amount,
                "currency": null,
                "raw_line": d.raw_line,
            })
        })
        .collect();

    json!({ "period": null, "transactions": transactions }).to_string()
}

/// Pick the listed category whose name shares a word with the description,
/// else the first one listed
fn classification_mock(prompt: &str) -> String {
    let description = prompt
        .split_once("Transaction: \"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(description, _)| description.to_lowercase())
        .unwrap_or_default();

    let listing = prompt
        .split_once("Categories (id: name):")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let categories: Vec<(i64, String)> = listing
        .lines()
        .filter_map(|line| {
            let (id, name) = line.split_once(':')?;
            Some((id.trim().parse().ok()?, name.trim().to_lowercase()))
        })
        .collect();

    let chosen = categories
        .iter()
        .find(|(_, name)| {
            name.split_whitespace()
                .any(|word| word.len() > 2 && description.contains(word))
        })
        .or_else(|| categories.first())
        .map(|(id, _)| *id)
        .unwrap_or(0);

    json!({ "category_id": chosen }).to_string()
}

fn synthesis_mock() -> String {
    json!({
        "summary": "Spending is up in one category compared with recent months.",
        "alerts": [{
            "type": "unusual_spending",
            "severity": "high",
            "title": "Category spending spike",
            "description": "One category is well above its usual monthly level.",
            "recommendation": "Review recent purchases in this category."
        }],
        "recommendations": ["Set a monthly budget for categories that spike."]
    })
    .to_string()
}

// Request/Response types for the mock server

#[derive(Debug, Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    modified_at: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[allow(dead_code)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}
