//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use cfo_core::ai::AIBackend;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ai_configured: bool,
    /// `None` when no backend is configured
    pub ai_reachable: Option<bool>,
    pub ai_host: Option<String>,
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ai = state.pipeline.ai();
    let ai_reachable = match ai {
        Some(client) => Some(client.health_check().await),
        None => None,
    };

    Json(HealthResponse {
        status: "ok",
        ai_configured: ai.is_some(),
        ai_reachable,
        ai_host: ai.map(|client| client.host().to_string()),
    })
}
