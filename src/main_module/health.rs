use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

/// Liveness only; does not touch the database.
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "ok": true })))
}
