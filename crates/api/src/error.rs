use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::HeaderName},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use voxgate_transcription::error::{
    PipelineError, STATUS_AUTH_FAILED, STATUS_INVALID_MESSAGE, STATUS_SERVER_ERROR,
};

pub const TASK_ID_HEADER: HeaderName = HeaderName::from_static("task_id");

/// Minimal body carried by every error response (and by envelope-style
/// success responses).
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub task_id: String,
    pub status: u32,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiErrorKind {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    InvalidMessage(String),
    #[error("{0}")]
    EngineUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

/// An error bound to the request's task ID, rendered as the standard
/// envelope with a `task_id` response header.
#[derive(Debug, Error)]
#[error("[{task_id}] {kind}")]
pub struct ApiError {
    pub task_id: String,
    pub kind: ApiErrorKind,
}

impl ApiError {
    pub fn auth(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: ApiErrorKind::Auth("invalid or missing token".to_string()),
        }
    }

    pub fn invalid(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: ApiErrorKind::InvalidMessage(message.into()),
        }
    }

    pub fn internal(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: ApiErrorKind::Internal(message.into()),
        }
    }

    pub fn from_pipeline(task_id: impl Into<String>, err: PipelineError) -> Self {
        let kind = match err {
            PipelineError::InvalidMessage(msg) => ApiErrorKind::InvalidMessage(msg),
            PipelineError::EngineUnavailable(msg) => ApiErrorKind::EngineUnavailable(msg),
            PipelineError::EngineFailure(e) => ApiErrorKind::Internal(e.to_string()),
            PipelineError::Transient(msg) => ApiErrorKind::Internal(msg),
        };
        Self {
            task_id: task_id.into(),
            kind,
        }
    }

    fn status(&self) -> (StatusCode, u32) {
        match self.kind {
            ApiErrorKind::Auth(_) => (StatusCode::UNAUTHORIZED, STATUS_AUTH_FAILED),
            ApiErrorKind::InvalidMessage(_) | ApiErrorKind::EngineUnavailable(_) => {
                (StatusCode::BAD_REQUEST, STATUS_INVALID_MESSAGE)
            }
            ApiErrorKind::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, STATUS_SERVER_ERROR)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.status();
        let body = Envelope {
            task_id: self.task_id.clone(),
            status,
            message: self.kind.to_string(),
        };
        let mut response = (code, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.task_id) {
            response.headers_mut().insert(TASK_ID_HEADER, value);
        }
        response
    }
}
