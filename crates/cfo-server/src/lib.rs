//! CFO Web Server
//!
//! Axum-based REST API for the statement processing pipeline.
//!
//! - Statement upload (multipart file or plain text)
//! - Stage operations: extract, categorize, process, retry
//! - Status polling and stored insights
//! - Category listing and seeding
//!
//! Core errors are mapped to HTTP statuses; internal details are logged, not returned.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use cfo_core::ai::{AIBackend, AIClient};
use cfo_core::db::Database;
use cfo_core::{Pipeline, PipelineConfig};

mod handlers;

/// Maximum statement upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

/// Shared application state
pub struct AppState {
    pub db: Arc<Database>,
    pub pipeline: Pipeline<Database>,
}

impl AppState {
    pub fn new(db: Database, ai: Option<AIClient>, config: PipelineConfig) -> Self {
        let db = Arc::new(db);
        let pipeline = Pipeline::new(db.clone(), ai, config);
        Self { db, pipeline }
    }

    /// State with the AI backend and pipeline config taken from the environment
    pub fn from_env(db: Database) -> anyhow::Result<Self> {
        let ai = AIClient::from_env();
        if let Some(ref client) = ai {
            let router_info = client.router_info();
            info!(
                "AI backend configured: {} (default model: {}, fallback: {})",
                client.host(),
                router_info.default_model,
                router_info.fallback_model.as_deref().unwrap_or("none")
            );
            for (task, model) in &router_info.task_models {
                info!("  - {}: {}", task, model);
            }
        } else {
            info!("AI backend not configured (set OLLAMA_HOST to enable the intelligence service)");
        }

        let config = PipelineConfig::load()?;
        Ok(Self::new(db, ai, config))
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Statements
        .route("/statements", post(handlers::upload_statement))
        .route("/statements/text", post(handlers::upload_statement_text))
        .route("/statements/:id", get(handlers::get_statement))
        .route("/statements/:id/extract", post(handlers::extract_statement))
        .route("/statements/:id/categorize", post(handlers::categorize_statement))
        .route("/statements/:id/process", post(handlers::process_statement))
        .route("/statements/:id/status", get(handlers::statement_status))
        .route("/statements/:id/retry", post(handlers::retry_statement))
        .route("/statements/:id/insights", get(handlers::statement_insights))
        // Categories
        .route(
            "/users/:user_id/categories",
            get(handlers::list_categories).post(handlers::add_category),
        )
        .route(
            "/users/:user_id/categories/seed",
            post(handlers::seed_categories),
        );

    let cors = {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
        if config.allowed_origins.is_empty() {
            layer
        } else {
            let origins: Vec<HeaderValue> = config
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            layer.allow_origin(origins)
        }
    };

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_SIZE + 64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the server
pub async fn run_server(db: Database, host: &str, port: u16, config: ServerConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_env(db)?);
    check_ai_connection(state.pipeline.ai()).await;

    let app = create_router(state, &config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log whether the configured intelligence service answers
async fn check_ai_connection(ai: Option<&AIClient>) {
    let Some(client) = ai else {
        return;
    };
    if client.health_check().await {
        info!("AI backend connected: {} ({})", client.host(), client.model());
    } else {
        warn!(
            "AI backend configured but not responding: {} (stages will use fallbacks)",
            client.host()
        );
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    kind: Option<&'static str>,
    internal: Option<cfo_core::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            kind: Some("invalid_request"),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            kind: Some("not_found"),
            internal: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(error = %err, kind = err.kind(), "Internal error");
        }

        let body = Json(ErrorBody {
            error: &self.message,
            kind: self.kind,
        });

        (self.status, body).into_response()
    }
}

impl From<cfo_core::Error> for AppError {
    fn from(err: cfo_core::Error) -> Self {
        use cfo_core::Error;

        let status = match &err {
            Error::InvalidTransition { .. }
            | Error::AlreadyInProgress(_)
            | Error::RetryLimitExceeded { .. } => StatusCode::CONFLICT,
            Error::InsufficientCategories { .. } | Error::ExtractionEmpty => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidData(_) | Error::Document(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            return Self {
                status,
                // Return generic message to client
                message: "An internal error occurred".to_string(),
                kind: Some(err.kind()),
                // Keep full error for logging
                internal: Some(err),
            };
        }

        Self {
            status,
            message: err.to_string(),
            kind: Some(err.kind()),
            internal: None,
        }
    }
}

#[cfg(test)]
mod tests;
