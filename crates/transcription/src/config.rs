use serde::{Deserialize, Serialize};

/// Tuning for the audio pipeline and streaming sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Upper bound on splitter segment duration (seconds).
    pub max_segment_sec: f64,
    /// Lower bound on splitter segment duration (seconds).
    pub min_segment_sec: f64,
    /// Directory for scratch WAV files.
    pub temp_dir: String,
    /// Drop low-energy strides before they reach the realtime engine.
    pub nearfield_filter: bool,
    /// RMS threshold (normalized samples) below which a stride is dropped.
    pub nearfield_rms_threshold: f32,
    /// Log each stride the near-field gate drops.
    pub nearfield_filter_log: bool,
    /// Stride duration forwarded to the realtime engine, in milliseconds.
    /// 600 ms = 9600 samples at 16 kHz.
    pub stride_ms: u64,
    /// Interval between streaming partial-result emissions (milliseconds).
    pub partial_interval_ms: u64,
    /// Minimum accumulated samples (16 kHz) before a partial is emitted.
    pub min_partial_samples: usize,
    /// RMS threshold used by the sliding-window endpointer to call a
    /// stride voiced.
    pub endpoint_rms_threshold: f32,
    /// Consecutive silent strides that end an open sentence.
    pub endpoint_silence_strides: usize,
    /// Force-end a sentence after this many seconds of speech.
    pub max_sentence_secs: f64,
    /// Per-inference-call timeout in seconds.
    pub engine_timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            max_segment_sec: 6.0,
            min_segment_sec: 0.8,
            temp_dir: "temp".to_string(),
            nearfield_filter: true,
            nearfield_rms_threshold: 0.01,
            nearfield_filter_log: true,
            stride_ms: 600,
            partial_interval_ms: 500,
            min_partial_samples: 8000,
            endpoint_rms_threshold: 0.01,
            endpoint_silence_strides: 1,
            max_sentence_secs: 30.0,
            engine_timeout_secs: 7200,
        }
    }
}
