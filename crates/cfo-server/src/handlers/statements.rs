//! Statement handlers

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{AppError, AppState, MAX_UPLOAD_SIZE};
use cfo_core::models::{Statement, StatementPeriod, StatusReport};
use cfo_core::{CategorizeReport, ExtractReport, Insights, ProcessOptions, ProcessReport, StageReport};

/// Optional body accepted by the stage operations
#[derive(Debug, Default, Deserialize)]
pub struct StageRequest {
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub card_id: Option<i64>,
    /// Replacement document text
    pub text: Option<String>,
}

impl StageRequest {
    fn into_options(self) -> Result<ProcessOptions, AppError> {
        let period = match (self.period_start, self.period_end) {
            (Some(start), Some(end)) => Some(
                StatementPeriod::new(start, end)
                    .ok_or_else(|| AppError::bad_request("period_end is before period_start"))?,
            ),
            (None, None) => None,
            _ => {
                return Err(AppError::bad_request(
                    "period_start and period_end must be given together",
                ))
            }
        };

        Ok(ProcessOptions {
            period,
            card_id: self.card_id,
            text: self.text,
            cancel: None,
        })
    }
}

fn options(body: Option<Json<StageRequest>>) -> Result<ProcessOptions, AppError> {
    body.map(|Json(request)| request)
        .unwrap_or_default()
        .into_options()
}

/// POST /api/statements - Upload a statement document
///
/// Expects multipart form with:
/// - file: statement document (required, max 10MB)
/// - user_id: owner of the statement (required)
/// - card_id: card the statement belongs to (optional)
pub async fn upload_statement(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Statement>), AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut user_id: Option<i64> = None;
    let mut card_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("statement").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read file data"))?;

                if bytes.len() > MAX_UPLOAD_SIZE {
                    return Err(AppError::bad_request(&format!(
                        "File too large. Maximum size is {} MB",
                        MAX_UPLOAD_SIZE / 1024 / 1024
                    )));
                }

                file = Some((filename, bytes.to_vec()));
            }
            "user_id" | "card_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request(&format!("Failed to read {}", name)))?;
                let parsed: i64 = value.trim().parse().map_err(|_| {
                    AppError::bad_request(&format!("Invalid {}: {}", name, value))
                })?;
                if name == "user_id" {
                    user_id = Some(parsed);
                } else {
                    card_id = Some(parsed);
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let user_id = user_id.ok_or_else(|| AppError::bad_request("Missing user_id field"))?;

    let statement = state.pipeline.upload(user_id, &filename, bytes, card_id)?;
    Ok((StatusCode::CREATED, Json(statement)))
}

/// Request body for uploading statement text directly
#[derive(Debug, Deserialize)]
pub struct TextUploadRequest {
    pub user_id: i64,
    pub filename: Option<String>,
    pub text: String,
    pub card_id: Option<i64>,
}

/// POST /api/statements/text - Upload statement text without a file
pub async fn upload_statement_text(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TextUploadRequest>,
) -> Result<(StatusCode, Json<Statement>), AppError> {
    let filename = request.filename.as_deref().unwrap_or("statement.txt");
    let statement = state.pipeline.upload(
        request.user_id,
        filename,
        request.text.into_bytes(),
        request.card_id,
    )?;
    Ok((StatusCode::CREATED, Json(statement)))
}

/// GET /api/statements/:id
pub async fn get_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Statement>, AppError> {
    Ok(Json(state.db.get_statement(id)?))
}

/// POST /api/statements/:id/extract - Run the extraction stage
pub async fn extract_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<StageRequest>>,
) -> Result<Json<ExtractReport>, AppError> {
    let options = options(body)?;
    Ok(Json(state.pipeline.extract(id, &options).await?))
}

/// POST /api/statements/:id/categorize - Run categorization and trend analysis
pub async fn categorize_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<StageRequest>>,
) -> Result<Json<CategorizeReport>, AppError> {
    let options = options(body)?;
    Ok(Json(state.pipeline.categorize(id, &options).await?))
}

/// POST /api/statements/:id/process - Run every remaining stage
pub async fn process_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<StageRequest>>,
) -> Result<Json<ProcessReport>, AppError> {
    let options = options(body)?;
    Ok(Json(state.pipeline.process(id, &options).await?))
}

/// GET /api/statements/:id/status - Poll processing status
pub async fn statement_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StatusReport>, AppError> {
    Ok(Json(state.pipeline.status(id)?))
}

/// POST /api/statements/:id/retry - Re-run a failed or abandoned stage
pub async fn retry_statement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<StageRequest>>,
) -> Result<Json<StageReport>, AppError> {
    let options = options(body)?;
    Ok(Json(state.pipeline.retry(id, &options).await?))
}

/// GET /api/statements/:id/insights - Stored analysis, alerts and rules
pub async fn statement_insights(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Insights>, AppError> {
    Ok(Json(state.pipeline.insights(id)?))
}
