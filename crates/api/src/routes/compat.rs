//! Fixed stubs kept for clients of the legacy process-management API.

use axum::{Json, extract::{Path, State}};
use serde_json::{Value, json};

use crate::state::AppState;

/// `GET /api/ps`
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "models": [
            state.registry.default_id(),
            "whisper-1",
            "Systran/faster-whisper-large-v2",
        ]
    }))
}

/// `POST /api/ps/{model_id}`, accepted and ignored.
pub async fn activate(Path(_model_id): Path<String>) -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `DELETE /api/ps/{model_id}`, accepted and ignored.
pub async fn deactivate(Path(_model_id): Path<String>) -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
