//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use cfo_core::ai::MockBackend;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const STATEMENT: &str = "\
2025-06-01 Coffee Shop $4.50
2025-06-03 Cinema Downtown $30.00
2025-06-05 Grocery Mart $80.00
";

fn setup_state(ai: Option<AIClient>) -> Arc<AppState> {
    let db = Database::in_memory().unwrap();
    Arc::new(AppState::new(db, ai, PipelineConfig::default()))
}

fn setup_test_app() -> (Router, Arc<AppState>) {
    let state = setup_state(None);
    state.db.seed_default_categories(1).unwrap();
    let router = create_router(state.clone(), &ServerConfig::default());
    (router, state)
}

async fn get_body_json(response: axum::response::Response) -> Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn upload_text(app: &Router, user_id: i64, text: &str) -> i64 {
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/statements/text",
            json!({ "user_id": user_id, "filename": "june.txt", "text": text }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    get_body_json(response).await["id"].as_i64().unwrap()
}

// ========== Health ==========

#[tokio::test]
async fn test_health_without_ai() {
    let (app, _state) = setup_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["ai_configured"], false);
    assert!(json["ai_reachable"].is_null());
}

#[tokio::test]
async fn test_health_reports_unreachable_ai() {
    let state = setup_state(Some(AIClient::from(MockBackend::unreachable())));
    let app = create_router(state, &ServerConfig::default());

    let json = get_body_json(app.oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(json["ai_configured"], true);
    assert_eq!(json["ai_reachable"], false);
}

// ========== Category API Tests ==========

#[tokio::test]
async fn test_seed_and_list_categories() {
    let state = setup_state(None);
    let app = create_router(state, &ServerConfig::default());

    let response = app
        .clone()
        .oneshot(post_empty("/api/users/7/categories/seed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let created = json["created"].as_u64().unwrap();
    assert!(created >= 5);
    assert_eq!(json["total"].as_u64().unwrap(), created);

    // Seeding again adds nothing
    let json = get_body_json(
        app.clone()
            .oneshot(post_empty("/api/users/7/categories/seed"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(json["created"], 0);

    let response = app.oneshot(get("/api/users/7/categories")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let categories = get_body_json(response).await;
    assert_eq!(categories.as_array().unwrap().len() as u64, created);
}

#[tokio::test]
async fn test_add_category() {
    let (app, _state) = setup_test_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/users/1/categories",
            json!({ "name": "Pets", "keywords": ["vet", "petco"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["name"], "Pets");
    assert_eq!(json["keywords"], json!(["vet", "petco"]));

    let response = app
        .oneshot(post_json("/api/users/1/categories", json!({ "name": "Pets" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(get_body_json(response).await["kind"], "invalid_data");
}

// ========== Statement API Tests ==========

#[tokio::test]
async fn test_upload_and_process_statement() {
    let (app, _state) = setup_test_app();
    let id = upload_text(&app, 1, STATEMENT).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/statements/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["status"], "uploaded");

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/statements/{}/process", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["found"], 3);
    assert_eq!(json["created"], 3);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/statements/{}/status", id)))
        .await
        .unwrap();
    let status = get_body_json(response).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["progress_percentage"], 100);
    assert_eq!(status["found_count"], 3);

    let response = app
        .oneshot(get(&format!("/api/statements/{}/insights", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let insights = get_body_json(response).await;
    assert_eq!(insights["analysis"]["groups"][0]["currency"], "USD");
    assert_eq!(insights["analysis"]["narrative"]["source"], "template");
}

#[tokio::test]
async fn test_stage_by_stage_with_period() {
    let (app, state) = setup_test_app();
    let id = upload_text(&app, 1, STATEMENT).await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/statements/{}/extract", id),
            json!({ "period_start": "2025-06-01", "period_end": "2025-06-30", "card_id": 4 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["found"], 3);
    assert_eq!(json["method"], "pattern");
    assert_eq!(json["period"]["month_key"], "2025-06");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/statements/{}/categorize", id),
            json!({ "card_id": 4 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["created"], 3);
    assert_eq!(json["rule_matched"], 3);

    let committed = state.db.list_statement_transactions(id).unwrap();
    assert!(committed.iter().all(|t| t.card_id == Some(4)));
}

#[tokio::test]
async fn test_multipart_upload() {
    let (app, _state) = setup_test_app();
    let boundary = "cfo-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"user_id\"\r\n\r\n1\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"june.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n{text}\r\n--{b}--\r\n",
        b = boundary,
        text = STATEMENT
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/statements")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = get_body_json(response).await;
    assert_eq!(json["filename"], "june.txt");
    assert_eq!(json["format"], "text");
    assert_eq!(json["user_id"], 1);
}

#[tokio::test]
async fn test_multipart_upload_requires_user() {
    let (app, _state) = setup_test_app();
    let boundary = "cfo-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"june.txt\"\r\n\r\n{text}\r\n--{b}--\r\n",
        b = boundary,
        text = STATEMENT
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/statements")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Error Mapping Tests ==========

#[tokio::test]
async fn test_insufficient_categories_is_unprocessable() {
    let state = setup_state(None);
    let app = create_router(state, &ServerConfig::default());
    let id = upload_text(&app, 2, STATEMENT).await;

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/statements/{}/process", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        get_body_json(response).await["kind"],
        "insufficient_categories"
    );

    let status = get_body_json(
        app.oneshot(get(&format!("/api/statements/{}/status", id)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["status"], "uploaded");
}

#[tokio::test]
async fn test_categorize_before_extract_is_conflict() {
    let (app, _state) = setup_test_app();
    let id = upload_text(&app, 1, STATEMENT).await;

    let response = app
        .oneshot(post_empty(&format!("/api/statements/{}/categorize", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(get_body_json(response).await["kind"], "invalid_transition");
}

#[tokio::test]
async fn test_missing_statement_is_not_found() {
    let (app, _state) = setup_test_app();

    for request in [
        get("/api/statements/999"),
        get("/api/statements/999/status"),
        get("/api/statements/999/insights"),
        post_empty("/api/statements/999/process"),
    ] {
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_half_period_is_bad_request() {
    let (app, _state) = setup_test_app();
    let id = upload_text(&app, 1, STATEMENT).await;

    let response = app
        .oneshot(post_json(
            &format!("/api/statements/{}/extract", id),
            json!({ "period_start": "2025-06-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_extraction_then_retry_with_text() {
    let (app, _state) = setup_test_app();
    let id = upload_text(&app, 1, "Nothing to see here\n").await;

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/statements/{}/process", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(get_body_json(response).await["kind"], "extraction_empty");

    let status = get_body_json(
        app.clone()
            .oneshot(get(&format!("/api/statements/{}/status", id)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["status"], "extract_failed");
    assert_eq!(status["retry_available"], true);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/statements/{}/retry", id),
            json!({ "text": STATEMENT }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["stage"], "extraction");
    assert_eq!(json["found"], 3);

    // Nothing left to retry once the stage succeeded
    let response = app
        .oneshot(post_empty(&format!("/api/statements/{}/retry", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_internal_errors_are_sanitized() {
    let err = AppError::from(cfo_core::Error::Persistence("disk I/O error at /var/db".into()));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = get_body_json(err.into_response()).await;
    assert_eq!(json["error"], "An internal error occurred");
    assert_eq!(json["kind"], "persistence_error");
}
