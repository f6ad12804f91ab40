pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Leave headroom over the audio cap so the limit error is ours, not
    // the framework's
    let body_limit =
        DefaultBodyLimit::max(state.settings.max_audio_size as usize + 1024 * 1024);

    // OpenAI-compatible surface, served under both prefixes
    let v1 = Router::new()
        .route(
            "/audio/transcriptions",
            post(routes::transcriptions::create),
        )
        .route("/models", get(routes::models::list));

    // Legacy process-management stubs
    let ps = Router::new().route("/", get(routes::compat::list)).route(
        "/{model_id}",
        post(routes::compat::activate).delete(routes::compat::deactivate),
    );

    Router::new()
        .nest("/v1", v1.clone())
        .nest("/api/v1", v1)
        .nest("/api/ps", ps)
        .route("/health", get(health_check))
        .route("/ws/v1/asr", get(ws::handler::ws_upgrade))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
