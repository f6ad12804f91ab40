use axum::{Json, extract::State, http::HeaderMap};
use serde_json::{Value, json};
use voxgate_transcription::ids::new_task_id;

use crate::auth::validate_token;
use crate::error::ApiError;
use crate::state::AppState;

/// Serves `GET /v1/models`: the catalog in OpenAI list shape.
pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let task_id = new_task_id();
    if !validate_token(state.settings.apptoken.as_deref(), &headers, None) {
        return Err(ApiError::auth(task_id));
    }

    let data: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "created": state.started_at,
                "owned_by": "voxgate",
            })
        })
        .collect();

    Ok(Json(json!({ "object": "list", "data": data })))
}
