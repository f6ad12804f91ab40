use std::io::Write;
use std::path::Path;

use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, HeaderValue, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;
use voxgate_transcription::batch::{BatchOptions, BatchOutcome};
use voxgate_transcription::ids::new_task_id;
use voxgate_transcription::subtitle::{
    ResponseFormat, render_srt, render_vtt, verbose_transcription,
};

use crate::auth::validate_token;
use crate::error::{ApiError, TASK_ID_HEADER};
use crate::state::AppState;

/// Upload is streamed to scratch in bounded increments; this is the read
/// granularity, not a limit.
const UPLOAD_CHUNK_BYTES: usize = 10 * 1024 * 1024;

/// Handles `POST /v1/audio/transcriptions`, the OpenAI-compatible batch endpoint.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let task_id = new_task_id();
    info!(%task_id, "transcription request received");

    if !validate_token(state.settings.apptoken.as_deref(), &headers, None) {
        return Err(ApiError::auth(task_id));
    }

    let form = read_form(&state, &task_id, multipart).await?;
    let (scratch, filename) = match form.upload {
        Some(upload) => upload,
        None => return Err(ApiError::invalid(task_id, "missing 'file' field")),
    };
    let format_hint = filename
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_string);

    let outcome = state
        .pipeline
        .transcribe_file(&task_id, &scratch, format_hint.as_deref(), &form.options)
        .await
        .map_err(|e| ApiError::from_pipeline(task_id.clone(), e))?;
    // Remove the upload scratch before responding
    drop(scratch);

    info!(
        %task_id,
        duration = outcome.duration,
        segments = outcome.result.segments.len(),
        "transcription finished"
    );
    Ok(respond(&task_id, &form.options, &outcome))
}

struct TranscriptionForm {
    upload: Option<(tempfile::TempPath, Option<String>)>,
    options: BatchOptions,
}

async fn read_form(
    state: &AppState,
    task_id: &str,
    mut multipart: Multipart,
) -> Result<TranscriptionForm, ApiError> {
    let mut form = TranscriptionForm {
        upload: None,
        options: BatchOptions {
            enable_punctuation: true,
            ..BatchOptions::default()
        },
    };

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid(task_id, format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let scratch = stream_to_scratch(state, task_id, &mut field).await?;
                form.upload = Some((scratch, filename));
            }
            "model" => form.options.model = Some(text_field(task_id, field).await?),
            "language" => form.options.language = Some(text_field(task_id, field).await?),
            "response_format" => {
                let value = text_field(task_id, field).await?;
                form.options.response_format = ResponseFormat::parse(&value).ok_or_else(|| {
                    ApiError::invalid(task_id, format!("unsupported response_format '{value}'"))
                })?;
            }
            "enable_punctuation" => {
                form.options.enable_punctuation = bool_field(task_id, field).await?;
            }
            "enable_itn" => form.options.enable_itn = bool_field(task_id, field).await?,
            "hotwords" => form.options.hotwords = Some(text_field(task_id, field).await?),
            "max_segment_sec" => {
                form.options.max_segment_sec = Some(float_field(task_id, field).await?);
            }
            "min_segment_sec" => {
                form.options.min_segment_sec = Some(float_field(task_id, field).await?);
            }
            // Accepted for OpenAI compatibility, intentionally unused
            "prompt" | "temperature" | "timestamp_granularities[]" => {
                let _ = field.text().await;
            }
            _ => {
                let _ = field.text().await;
            }
        }
    }
    Ok(form)
}

/// Streams the upload into a scratch file, enforcing the size cap as bytes
/// arrive rather than after buffering the body.
async fn stream_to_scratch(
    state: &AppState,
    task_id: &str,
    field: &mut axum::extract::multipart::Field<'_>,
) -> Result<tempfile::TempPath, ApiError> {
    let temp_dir = &state.settings.temp_dir;
    std::fs::create_dir_all(temp_dir)
        .map_err(|e| ApiError::internal(task_id, format!("cannot create temp dir: {e}")))?;
    let mut scratch = tempfile::Builder::new()
        .prefix("upload_")
        .tempfile_in(temp_dir)
        .map_err(|e| ApiError::internal(task_id, format!("cannot create scratch file: {e}")))?;

    let limit = state.settings.max_audio_size;
    let mut total: u64 = 0;
    let mut buffered: usize = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::invalid(task_id, format!("upload aborted: {e}")))?
    {
        total += chunk.len() as u64;
        if total > limit {
            // Dropping `scratch` unlinks the partial file
            let limit_mib = limit / 1024 / 1024;
            return Err(ApiError::invalid(
                task_id,
                format!("audio file too large, limit is {limit_mib} MiB"),
            ));
        }
        scratch
            .write_all(&chunk)
            .map_err(|e| ApiError::internal(task_id, format!("scratch write failed: {e}")))?;
        buffered += chunk.len();
        if buffered >= UPLOAD_CHUNK_BYTES {
            scratch
                .flush()
                .map_err(|e| ApiError::internal(task_id, format!("scratch flush failed: {e}")))?;
            buffered = 0;
        }
    }

    info!(%task_id, bytes = total, "upload received");
    Ok(scratch.into_temp_path())
}

async fn text_field(
    task_id: &str,
    field: axum::extract::multipart::Field<'_>,
) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| ApiError::invalid(task_id, format!("unreadable form field: {e}")))
}

async fn bool_field(
    task_id: &str,
    field: axum::extract::multipart::Field<'_>,
) -> Result<bool, ApiError> {
    let value = text_field(task_id, field).await?;
    Ok(matches!(value.to_ascii_lowercase().as_str(), "true" | "1"))
}

async fn float_field(
    task_id: &str,
    field: axum::extract::multipart::Field<'_>,
) -> Result<f64, ApiError> {
    let value = text_field(task_id, field).await?;
    value
        .parse::<f64>()
        .map_err(|_| ApiError::invalid(task_id, format!("invalid number '{value}'")))
}

fn respond(task_id: &str, options: &BatchOptions, outcome: &BatchOutcome) -> Response {
    let mut response = match options.response_format {
        ResponseFormat::Json => Json(json!({ "text": outcome.result.text })).into_response(),
        ResponseFormat::VerboseJson => Json(verbose_transcription(
            &outcome.result,
            outcome.duration,
            options.language.as_deref(),
        ))
        .into_response(),
        ResponseFormat::Text => outcome.result.text.clone().into_response(),
        ResponseFormat::Srt => render_srt(&outcome.result.segments).into_response(),
        ResponseFormat::Vtt => render_vtt(&outcome.result.segments).into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(task_id) {
        response.headers_mut().insert(TASK_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(options.response_format.content_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
