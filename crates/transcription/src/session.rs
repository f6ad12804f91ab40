use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::asr::{RealtimeEvent, RealtimeOptions};
use crate::audio::rms;
use crate::config::TranscriptionConfig;
use crate::error::{STATUS_INVALID_MESSAGE, STATUS_SERVER_ERROR, STATUS_SUCCESS};
use crate::ids::new_message_id;
use crate::registry::EngineRegistry;
use crate::text::{ItnNormalizer, apply_itn, clean_asr_tags};

pub const NAMESPACE: &str = "SpeechTranscriber";

// Event names on the wire
pub const EVENT_TRANSCRIPTION_STARTED: &str = "TranscriptionStarted";
pub const EVENT_SENTENCE_BEGIN: &str = "SentenceBegin";
pub const EVENT_RESULT_CHANGED: &str = "TranscriptionResultChanged";
pub const EVENT_SENTENCE_END: &str = "SentenceEnd";
pub const EVENT_TRANSCRIPTION_COMPLETED: &str = "TranscriptionCompleted";
pub const EVENT_TASK_FAILED: &str = "TaskFailed";

// Control names accepted from the client
pub const CONTROL_START: &str = "StartTranscription";
pub const CONTROL_STOP: &str = "StopTranscription";

/// Header of an outbound event frame.
#[derive(Debug, Clone, Serialize)]
pub struct ServerHeader {
    pub message_id: String,
    pub task_id: String,
    pub namespace: &'static str,
    pub name: &'static str,
    pub status: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

/// One outbound event frame.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub header: ServerHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ServerFrame {
    pub fn name(&self) -> &str {
        self.header.name
    }
}

/// Inbound control frame.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    header: ClientHeader,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ClientHeader {
    #[serde(default)]
    task_id: Option<String>,
    name: String,
}

/// `StartTranscription` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StartParams {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub enable_intermediate_result: bool,
    #[serde(default)]
    pub enable_punctuation_prediction: bool,
    #[serde(default)]
    pub enable_inverse_text_normalization: bool,
}

fn default_format() -> String {
    "pcm".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Started,
    Draining,
    Closed,
    Failed,
}

/// Counters kept per session for log lines.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub pcm_frames: u64,
    pub strides_forwarded: u64,
    pub strides_gated: u64,
}

/// What one input produced: frames to send, possibly a new engine event
/// receiver (after a successful start), and whether the socket should close.
#[derive(Default)]
pub struct SessionResult {
    pub frames: Vec<ServerFrame>,
    pub events: Option<mpsc::Receiver<RealtimeEvent>>,
    pub close: bool,
}

impl SessionResult {
    fn frames(frames: Vec<ServerFrame>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }
}

/// Per-connection streaming transcription state machine.
///
/// Consumes interleaved control and binary PCM frames, forwards coalesced
/// strides to a realtime engine, and emits protocol events in order:
/// `TranscriptionStarted`, then per sentence `SentenceBegin`,
/// `TranscriptionResultChanged`*, `SentenceEnd`, and finally
/// `TranscriptionCompleted` (or a single `TaskFailed`).
pub struct StreamSession {
    task_id: String,
    state: SessionState,
    params: Option<StartParams>,
    config: TranscriptionConfig,
    itn: Option<Arc<dyn ItnNormalizer>>,
    /// Index of the open sentence; first `SentenceBegin` makes it 1.
    sentence_index: u32,
    sentence_open: bool,
    pending: Vec<i16>,
    stride_samples: usize,
    audio_tx: Option<mpsc::Sender<Vec<i16>>>,
    stats: SessionStats,
}

impl StreamSession {
    pub fn new(
        task_id: String,
        config: TranscriptionConfig,
        itn: Option<Arc<dyn ItnNormalizer>>,
    ) -> Self {
        Self {
            task_id,
            state: SessionState::Init,
            params: None,
            config,
            itn,
            sentence_index: 0,
            sentence_open: false,
            pending: Vec::new(),
            stride_samples: 0,
            audio_tx: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Handles one inbound text frame.
    pub async fn on_text(&mut self, registry: &EngineRegistry, raw: &str) -> SessionResult {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                return self.fail(
                    STATUS_INVALID_MESSAGE,
                    format!("malformed control frame: {e}"),
                );
            }
        };

        match (self.state, frame.header.name.as_str()) {
            (SessionState::Init, CONTROL_START) => self.start(registry, frame).await,
            (SessionState::Started, CONTROL_STOP) => self.stop().await,
            (state, name) => self.fail(
                STATUS_INVALID_MESSAGE,
                format!("unexpected control '{name}' in state {state:?}"),
            ),
        }
    }

    /// Handles one inbound binary PCM frame.
    pub async fn on_binary(&mut self, data: &[u8]) -> SessionResult {
        if self.state != SessionState::Started {
            return self.fail(
                STATUS_INVALID_MESSAGE,
                format!("binary audio not allowed in state {:?}", self.state),
            );
        }
        if data.len() % 2 != 0 {
            return self.fail(
                STATUS_INVALID_MESSAGE,
                "PCM frame has an odd byte count".to_string(),
            );
        }

        self.stats.pcm_frames += 1;
        self.pending.extend(
            data.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );

        while self.pending.len() >= self.stride_samples {
            let stride: Vec<i16> = self.pending.drain(..self.stride_samples).collect();
            if let Some(result) = self.forward_stride(stride).await {
                return result;
            }
        }
        SessionResult::default()
    }

    /// Maps one engine event onto outbound frames.
    pub fn on_engine_event(&mut self, event: RealtimeEvent) -> SessionResult {
        match event {
            RealtimeEvent::SentenceBegin { begin_ms } => {
                self.sentence_index += 1;
                self.sentence_open = true;
                debug!(task_id = %self.task_id, index = self.sentence_index, begin_ms, "sentence begin");
                SessionResult::frames(vec![self.event_frame(
                    EVENT_SENTENCE_BEGIN,
                    json!({ "index": self.sentence_index, "time": begin_ms }),
                )])
            }
            RealtimeEvent::Partial { text } => {
                let enabled = self
                    .params
                    .as_ref()
                    .is_some_and(|p| p.enable_intermediate_result);
                if !enabled {
                    return SessionResult::default();
                }
                let text = clean_asr_tags(&text);
                SessionResult::frames(vec![self.event_frame(
                    EVENT_RESULT_CHANGED,
                    json!({ "index": self.sentence_index, "result": text }),
                )])
            }
            RealtimeEvent::SentenceEnd {
                text,
                begin_ms,
                end_ms,
            } => {
                self.sentence_open = false;
                let mut text = clean_asr_tags(&text);
                if self
                    .params
                    .as_ref()
                    .is_some_and(|p| p.enable_inverse_text_normalization)
                    && let Some(itn) = &self.itn
                {
                    text = apply_itn(itn.as_ref(), &text);
                }
                debug!(task_id = %self.task_id, index = self.sentence_index, "sentence end");
                SessionResult::frames(vec![self.event_frame(
                    EVENT_SENTENCE_END,
                    json!({
                        "index": self.sentence_index,
                        "result": text,
                        "begin_time": begin_ms,
                        "time": end_ms,
                    }),
                )])
            }
            RealtimeEvent::Error { message } => self.fail(STATUS_SERVER_ERROR, message),
        }
    }

    /// The engine closed its event channel.
    pub fn on_engine_closed(&mut self) -> SessionResult {
        match self.state {
            SessionState::Draining => {
                self.state = SessionState::Closed;
                info!(
                    task_id = %self.task_id,
                    sentences = self.sentence_index,
                    strides = self.stats.strides_forwarded,
                    gated = self.stats.strides_gated,
                    "transcription completed"
                );
                SessionResult {
                    frames: vec![self.status_frame(
                        EVENT_TRANSCRIPTION_COMPLETED,
                        STATUS_SUCCESS,
                        None,
                    )],
                    events: None,
                    close: true,
                }
            }
            SessionState::Started => {
                self.fail(STATUS_SERVER_ERROR, "engine closed unexpectedly".to_string())
            }
            _ => SessionResult {
                close: true,
                ..SessionResult::default()
            },
        }
    }

    async fn start(&mut self, registry: &EngineRegistry, frame: ClientFrame) -> SessionResult {
        let params: StartParams = match frame.payload {
            Some(payload) => match serde_json::from_value(payload) {
                Ok(params) => params,
                Err(e) => {
                    return self.fail(
                        STATUS_INVALID_MESSAGE,
                        format!("invalid StartTranscription payload: {e}"),
                    );
                }
            },
            None => StartParams {
                format: default_format(),
                sample_rate: default_sample_rate(),
                enable_intermediate_result: false,
                enable_punctuation_prediction: false,
                enable_inverse_text_normalization: false,
            },
        };

        if params.format != "pcm" {
            return self.fail(
                STATUS_INVALID_MESSAGE,
                format!("unsupported audio format '{}'", params.format),
            );
        }
        if params.sample_rate != 8000 && params.sample_rate != 16_000 {
            return self.fail(
                STATUS_INVALID_MESSAGE,
                format!("unsupported sample rate {}", params.sample_rate),
            );
        }

        // Adopt the client's task ID so its frames correlate
        if let Some(task_id) = frame.header.task_id
            && !task_id.is_empty()
            && task_id.len() <= 64
        {
            self.task_id = task_id;
        }

        let options = RealtimeOptions {
            sample_rate: params.sample_rate,
            language_hint: None,
            enable_punctuation: params.enable_punctuation_prediction,
            enable_itn: params.enable_inverse_text_normalization,
        };
        let (audio_tx, events) = match registry.start_realtime(None, options).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "failed to start realtime engine");
                return self.fail(e.status(), e.to_string());
            }
        };

        // One stride = 600 ms of audio at the declared rate
        self.stride_samples = (params.sample_rate as u64 * self.config.stride_ms / 1000) as usize;
        self.params = Some(params);
        self.audio_tx = Some(audio_tx);
        self.state = SessionState::Started;
        info!(task_id = %self.task_id, "transcription started");

        SessionResult {
            frames: vec![self.status_frame(EVENT_TRANSCRIPTION_STARTED, STATUS_SUCCESS, None)],
            events: Some(events),
            close: false,
        }
    }

    async fn stop(&mut self) -> SessionResult {
        info!(task_id = %self.task_id, "stop requested, draining");
        self.state = SessionState::Draining;
        // Flush the sub-stride remainder so trailing audio is not lost,
        // then drop the sender to let the engine drain
        let remainder: Vec<i16> = std::mem::take(&mut self.pending);
        if let Some(audio_tx) = self.audio_tx.take()
            && !remainder.is_empty()
        {
            let _ = audio_tx.send(remainder).await;
        }
        SessionResult::default()
    }

    /// Forwards one stride through the near-field gate. Returns a terminal
    /// result only on failure.
    async fn forward_stride(&mut self, stride: Vec<i16>) -> Option<SessionResult> {
        if self.config.nearfield_filter && !self.sentence_open {
            let energy = rms(&stride);
            if energy < self.config.nearfield_rms_threshold {
                self.stats.strides_gated += 1;
                if self.config.nearfield_filter_log {
                    debug!(task_id = %self.task_id, energy, "near-field gate dropped stride");
                }
                return None;
            }
        }

        let Some(audio_tx) = &self.audio_tx else {
            return Some(self.fail(
                STATUS_SERVER_ERROR,
                "audio received but engine session is gone".to_string(),
            ));
        };
        if audio_tx.send(stride).await.is_err() {
            return Some(self.fail(
                STATUS_SERVER_ERROR,
                "realtime engine stopped accepting audio".to_string(),
            ));
        }
        self.stats.strides_forwarded += 1;
        None
    }

    /// Builds the single terminal failure frame and poisons the session.
    pub fn fail(&mut self, status: u32, message: String) -> SessionResult {
        warn!(task_id = %self.task_id, status, %message, "session failed");
        self.state = SessionState::Failed;
        self.audio_tx = None;
        SessionResult {
            frames: vec![self.status_frame(EVENT_TASK_FAILED, status, Some(message))],
            events: None,
            close: true,
        }
    }

    fn event_frame(&self, name: &'static str, payload: Value) -> ServerFrame {
        ServerFrame {
            header: ServerHeader {
                message_id: new_message_id(),
                task_id: self.task_id.clone(),
                namespace: NAMESPACE,
                name,
                status: STATUS_SUCCESS,
                status_message: None,
                status_text: None,
            },
            payload: Some(payload),
        }
    }

    fn status_frame(
        &self,
        name: &'static str,
        status: u32,
        status_text: Option<String>,
    ) -> ServerFrame {
        ServerFrame {
            header: ServerHeader {
                message_id: new_message_id(),
                task_id: self.task_id.clone(),
                namespace: NAMESPACE,
                name,
                status,
                status_message: status_text.clone(),
                status_text,
            },
            payload: None,
        }
    }
}
