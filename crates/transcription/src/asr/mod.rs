#[cfg(feature = "local-whisper")]
pub mod local_whisper;

pub mod sliding_window;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One transcribed span within a result.
///
/// `id` is dense from 0 within one response; `end >= start` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub id: usize,
    /// Start of the span in seconds.
    pub start: f64,
    /// End of the span in seconds.
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_logprob: Option<f64>,
    pub no_speech_prob: f64,
}

impl TranscriptionSegment {
    pub fn new(id: usize, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            id,
            start,
            end,
            text: text.into(),
            speaker_id: None,
            tokens: None,
            avg_logprob: None,
            no_speech_prob: 0.0,
        }
    }
}

/// Full result of transcribing one audio input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsrResult {
    pub text: String,
    pub segments: Vec<TranscriptionSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Decode-time options applied when an engine is loaded.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub enable_lm: bool,
    pub lm_weight: f64,
    pub lm_beam_size: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            enable_lm: true,
            lm_weight: 0.15,
            lm_beam_size: 10,
        }
    }
}

/// Request to transcribe one audio segment.
#[derive(Debug, Clone)]
pub struct AsrRequest {
    /// PCM at 16 kHz mono, f32 normalized [-1.0, 1.0].
    pub audio_pcm_16k_mono: Vec<f32>,
    /// Optional language hint (ISO 639-1, e.g. "zh", "en").
    pub language_hint: Option<String>,
    /// Comma/space separated hotword list boosting recognition.
    pub hotwords: Option<String>,
    pub enable_punctuation: bool,
    pub enable_itn: bool,
}

impl AsrRequest {
    pub fn new(audio_pcm_16k_mono: Vec<f32>) -> Self {
        Self {
            audio_pcm_16k_mono,
            language_hint: None,
            hotwords: None,
            enable_punctuation: true,
            enable_itn: false,
        }
    }
}

/// An offline (whole-utterance) recognition engine.
#[async_trait]
pub trait AsrEngine: Send + Sync + 'static {
    /// Transcribes a complete audio segment.
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<AsrResult>;

    /// Human-readable engine name.
    fn name(&self) -> &str;
}

/// Incremental output of a realtime recognition session.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// A new utterance opened at `begin_ms` on the session clock.
    SentenceBegin { begin_ms: u64 },
    /// Updated partial text for the open utterance.
    Partial { text: String },
    /// The open utterance closed with its final text.
    SentenceEnd {
        text: String,
        begin_ms: u64,
        end_ms: u64,
    },
    /// The engine failed; the session must terminate.
    Error { message: String },
}

/// Options for starting a realtime session.
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    /// Inbound sample rate: 8000 or 16000.
    pub sample_rate: u32,
    pub language_hint: Option<String>,
    pub enable_punctuation: bool,
    pub enable_itn: bool,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            language_hint: None,
            enable_punctuation: true,
            enable_itn: false,
        }
    }
}

/// An engine that accepts audio incrementally and emits partial and final
/// results.
///
/// `start_session` returns a sender for PCM strides and a receiver for
/// events. Dropping the sender signals end of audio: the engine flushes any
/// open utterance and then closes the event channel.
#[async_trait]
pub trait RealtimeAsrEngine: Send + Sync + 'static {
    async fn start_session(
        &self,
        options: RealtimeOptions,
    ) -> anyhow::Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<RealtimeEvent>)>;

    fn name(&self) -> &str;
}
