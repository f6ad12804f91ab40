use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::asr::{AsrRequest, AsrResult, TranscriptionSegment};
use crate::audio::{PcmAudio, decode, rms, wav};
use crate::config::TranscriptionConfig;
use crate::dispatch::Dispatcher;
use crate::error::PipelineResult;
use crate::registry::EngineRegistry;
use crate::splitter::{AudioSegment, Splitter};
use crate::subtitle::ResponseFormat;
use crate::text::{ItnNormalizer, apply_itn, clean_asr_tags, join_texts};
use crate::vad::VadClient;

/// Widest segment bound; plain output formats carry no per-sentence
/// timestamps, so splitting finer than this only adds engine calls.
const PLAIN_FORMAT_MAX_SEGMENT_SEC: f64 = 55.0;

/// Caller-supplied knobs for one batch transcription.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub model: Option<String>,
    pub language: Option<String>,
    pub response_format: ResponseFormat,
    pub enable_punctuation: bool,
    pub enable_itn: bool,
    pub hotwords: Option<String>,
    pub max_segment_sec: Option<f64>,
    pub min_segment_sec: Option<f64>,
}

/// Result of a batch run plus the measured input duration.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub result: AsrResult,
    pub duration: f64,
}

/// Upload-to-result pipeline: decode, split, fan segments through the
/// engine, merge with rebased timestamps.
pub struct BatchPipeline {
    registry: Arc<EngineRegistry>,
    vad: Arc<VadClient>,
    dispatcher: Arc<Dispatcher>,
    config: TranscriptionConfig,
    itn: Option<Arc<dyn ItnNormalizer>>,
}

impl BatchPipeline {
    pub fn new(
        registry: Arc<EngineRegistry>,
        vad: Arc<VadClient>,
        dispatcher: Arc<Dispatcher>,
        config: TranscriptionConfig,
        itn: Option<Arc<dyn ItnNormalizer>>,
    ) -> Self {
        Self {
            registry,
            vad,
            dispatcher,
            config,
            itn,
        }
    }

    /// Transcribes one uploaded file. Every scratch file created along the
    /// way is removed before this returns, on success and on error alike.
    pub async fn transcribe_file(
        &self,
        task_id: &str,
        audio_path: &Path,
        format_hint: Option<&str>,
        options: &BatchOptions,
    ) -> PipelineResult<BatchOutcome> {
        let path: PathBuf = audio_path.to_path_buf();
        let hint = format_hint.map(str::to_string);
        let audio = self
            .dispatcher
            .run_blocking(move || decode::decode_file(&path, hint.as_deref()))
            .await?;
        let audio = Arc::new(audio);
        let duration = audio.duration_sec();
        info!(%task_id, duration, "audio decoded");

        let max_segment_sec = if options.response_format.is_plain() {
            PLAIN_FORMAT_MAX_SEGMENT_SEC
        } else {
            options.max_segment_sec.unwrap_or(self.config.max_segment_sec)
        };
        let min_segment_sec = options
            .min_segment_sec
            .unwrap_or(self.config.min_segment_sec);
        let splitter = Splitter::new(max_segment_sec, min_segment_sec)?;

        let segments = self.split(task_id, &audio, splitter).await?;
        info!(%task_id, count = segments.len(), "audio segmented");

        let result = self.transcribe_segments(task_id, &segments, options).await?;
        Ok(BatchOutcome { result, duration })
    }

    /// Splits decoded audio, consulting VAD only when the input actually
    /// exceeds the bound.
    async fn split(
        &self,
        task_id: &str,
        audio: &Arc<PcmAudio>,
        splitter: Splitter,
    ) -> PipelineResult<Vec<AudioSegment>> {
        let total_ms = audio.duration_ms();
        if total_ms <= splitter.max_ms() {
            debug!(%task_id, total_ms, "input fits in one segment");
            return Ok(vec![Splitter::whole(audio)]);
        }

        // The VAD engine reads from disk, so stage a canonical 16 kHz WAV
        let scratch_dir = PathBuf::from(&self.config.temp_dir);
        let staged = {
            let audio = audio.clone();
            let scratch_dir = scratch_dir.clone();
            self.dispatcher
                .run_blocking(move || {
                    std::fs::create_dir_all(&scratch_dir)?;
                    let staged = tempfile::Builder::new()
                        .prefix("vad_input_")
                        .suffix(".wav")
                        .tempfile_in(&scratch_dir)?
                        .into_temp_path();
                    wav::write_wav(&staged, &audio.samples)
                        .map_err(|e| crate::error::PipelineError::Transient(e.to_string()))?;
                    Ok(staged)
                })
                .await?
        };

        let vad_timeout = std::time::Duration::from_secs(self.config.engine_timeout_secs);
        let regions = tokio::time::timeout(vad_timeout, self.vad.detect(&staged))
            .await
            .map_err(|_| {
                crate::error::PipelineError::Transient(format!(
                    "voice activity detection timed out after {}s",
                    self.config.engine_timeout_secs
                ))
            })??;
        let plan = splitter.plan(&regions, total_ms);
        debug!(%task_id, regions = regions.len(), segments = plan.len(), "split planned");

        let audio = audio.clone();
        let segments = self
            .dispatcher
            .run_blocking(move || splitter.cut(&audio, &plan, &scratch_dir))
            .await?;
        // `staged` drops here, removing the VAD input file
        drop(staged);
        Ok(segments)
    }

    /// Runs every segment through the engine in time order, rebasing the
    /// per-segment timestamps onto the request clock.
    async fn transcribe_segments(
        &self,
        task_id: &str,
        segments: &[AudioSegment],
        options: &BatchOptions,
    ) -> PipelineResult<AsrResult> {
        let handle = self.registry.get(options.model.as_deref())?;

        let mut merged: Vec<TranscriptionSegment> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        let mut language: Option<String> = None;

        for segment in segments {
            if self.config.nearfield_filter
                && rms(&segment.samples) < self.config.nearfield_rms_threshold
            {
                if self.config.nearfield_filter_log {
                    debug!(
                        %task_id,
                        start_ms = segment.start_ms,
                        end_ms = segment.end_ms,
                        "segment below energy threshold, engine call skipped"
                    );
                }
                continue;
            }

            let request = AsrRequest {
                audio_pcm_16k_mono: segment.samples.iter().map(|&s| s as f32 / 32768.0).collect(),
                language_hint: options.language.clone(),
                hotwords: options.hotwords.clone(),
                enable_punctuation: options.enable_punctuation,
                enable_itn: options.enable_itn,
            };
            // A failing segment aborts the whole request
            let output = self.registry.transcribe_on(&handle, request).await?;

            let text = clean_asr_tags(&output.text);
            let offset = segment.start_sec();
            if output.segments.is_empty() {
                if !text.is_empty() {
                    merged.push(TranscriptionSegment::new(
                        0,
                        offset,
                        segment.end_sec(),
                        text.clone(),
                    ));
                }
            } else {
                for mut span in output.segments {
                    span.start += offset;
                    span.end = (span.end + offset).max(span.start);
                    span.text = clean_asr_tags(&span.text);
                    merged.push(span);
                }
            }
            if language.is_none() {
                language = output.language;
            }
            texts.push(text);
        }

        let mut text = join_texts(&texts);
        if options.enable_itn && let Some(itn) = &self.itn {
            text = apply_itn(itn.as_ref(), &text);
        }

        merged.sort_by(|a, b| a.start.total_cmp(&b.start));
        for (index, span) in merged.iter_mut().enumerate() {
            span.id = index;
        }

        Ok(AsrResult {
            text,
            segments: merged,
            language,
        })
    }
}
