//! Category handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};
use cfo_core::models::Category;

/// GET /api/users/:user_id/categories - List a user's categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.db.list_categories(user_id)?))
}

/// Request body for creating a category
#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// POST /api/users/:user_id/categories - Create a category
pub async fn add_category(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    let category = state
        .db
        .add_category(user_id, &request.name, &request.keywords)?;
    Ok((StatusCode::CREATED, Json(category)))
}

#[derive(Debug, Serialize)]
pub struct SeedResponse {
    /// Defaults inserted by this call
    pub created: usize,
    /// Categories counting toward the processing minimum
    pub total: usize,
}

/// POST /api/users/:user_id/categories/seed - Add the default category set
pub async fn seed_categories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<SeedResponse>, AppError> {
    let created = state.db.seed_default_categories(user_id)?;
    let total = state.db.count_categories(user_id)?;
    Ok(Json(SeedResponse { created, total }))
}
