use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AsrEngine, AsrRequest, AsrResult, DecodeOptions, TranscriptionSegment};
use crate::registry::{EngineLoader, LoadedEngine};

/// Get the language string for a whisper language ID.
fn whisper_lang_str(lang_id: i32) -> Option<String> {
    whisper_rs::get_lang_str(lang_id).map(|s| s.to_string())
}

/// Offline ASR engine backed by whisper.cpp via whisper-rs.
pub struct LocalWhisperEngine {
    ctx: WhisperContext,
    beam_size: i32,
}

impl LocalWhisperEngine {
    /// Loads a GGML whisper model from disk (e.g. ggml-base.bin).
    pub fn new(model_path: &str, beam_size: i32) -> anyhow::Result<Self> {
        info!(model_path, "loading whisper model");
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("failed to load whisper model '{}': {}", model_path, e))?;
        info!("whisper model loaded");
        Ok(Self { ctx, beam_size })
    }
}

#[async_trait]
impl AsrEngine for LocalWhisperEngine {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult> {
        let audio = request.audio_pcm_16k_mono;
        let lang = request.language_hint;
        let beam_size = self.beam_size;

        // whisper-rs is CPU-bound; run on the blocking thread pool.
        let ctx_ptr = &self.ctx as *const WhisperContext;
        // SAFETY: WhisperContext is Send+Sync, and we create a new state per call
        let ctx_ref = unsafe { &*ctx_ptr };

        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<AsrResult> {
            let mut state = ctx_ref
                .create_state()
                .map_err(|e| anyhow::anyhow!("failed to create whisper state: {}", e))?;

            let mut params = FullParams::new(SamplingStrategy::BeamSearch {
                beam_size,
                patience: 1.0,
            });

            if let Some(ref lang) = lang {
                params.set_language(Some(lang));
            } else {
                params.set_detect_language(true);
            }

            // Always transcribe in the source language
            params.set_translate(false);

            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            params.set_single_segment(false);
            params.set_no_speech_thold(0.6);
            params.set_suppress_blank(true);

            state
                .full(params, &audio)
                .map_err(|e| anyhow::anyhow!("whisper transcription failed: {}", e))?;

            let n_segments = state.full_n_segments();

            let mut text = String::new();
            let mut segments = Vec::new();
            for i in 0..n_segments {
                if let Some(segment) = state.get_segment(i)
                    && let Ok(seg_text) = segment.to_str()
                {
                    text.push_str(seg_text);
                    // Timestamps arrive in centiseconds
                    let start = segment.start_timestamp() as f64 / 100.0;
                    let end = segment.end_timestamp() as f64 / 100.0;
                    segments.push(TranscriptionSegment::new(
                        segments.len(),
                        start,
                        end.max(start),
                        seg_text.trim(),
                    ));
                }
            }

            let text = text.trim().to_string();
            let detected_lang = whisper_lang_str(state.full_lang_id_from_state()).or(lang);

            debug!(text_len = text.len(), ?detected_lang, "whisper transcription complete");

            Ok(AsrResult {
                text,
                segments,
                language: detected_lang,
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("whisper task join error: {}", e))??;

        Ok(result)
    }

    fn name(&self) -> &str {
        "local_whisper"
    }
}

/// Lazily constructs a [`LocalWhisperEngine`] when the registry first needs it.
pub struct LocalWhisperLoader {
    pub model_path: String,
}

#[async_trait]
impl EngineLoader for LocalWhisperLoader {
    async fn load(&self, options: &DecodeOptions) -> anyhow::Result<LoadedEngine> {
        let model_path = self.model_path.clone();
        let beam_size = if options.enable_lm {
            options.lm_beam_size.max(1) as i32
        } else {
            5
        };
        let engine = tokio::task::spawn_blocking(move || {
            LocalWhisperEngine::new(&model_path, beam_size)
        })
        .await
        .map_err(|e| anyhow::anyhow!("whisper load join error: {}", e))??;

        Ok(LoadedEngine {
            offline: Some(Arc::new(engine)),
            realtime: None,
        })
    }
}
