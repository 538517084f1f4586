//! Liveness endpoint, grounded on the teacher's `GET /health` handler
//! shape (a constant 200 with no dependency on the store or any
//! capability), kept separate from folder-level indexing status.

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
