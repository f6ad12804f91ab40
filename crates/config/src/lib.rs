use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Application settings, read from environment variables.
///
/// Every knob has a default; the environment overrides field-by-field
/// (e.g. `MAX_SEGMENT_SEC=8.0`). Call [`Settings::from_env`] once at
/// startup and share the result.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Bind address for the HTTP server.
    pub host: String,
    /// Bind port for the HTTP server.
    pub port: u16,
    /// Bearer token required on all endpoints. Unset means open access.
    pub apptoken: Option<String>,
    /// Directory for scratch audio files.
    pub temp_dir: String,
    /// Maximum accepted upload size in bytes.
    pub max_audio_size: u64,
    /// Upper bound on segment duration produced by the splitter (seconds).
    pub max_segment_sec: f64,
    /// Lower bound on segment duration produced by the splitter (seconds).
    pub min_segment_sec: f64,
    /// Canonical ID of the engine used when the caller names none (or an alias).
    pub default_asr_model_id: String,
    /// Which engine capabilities may be loaded: "realtime", "offline" or "all".
    pub asr_model_mode: String,
    /// Drop low-energy strides before they reach the realtime engine.
    pub asr_enable_nearfield_filter: bool,
    /// RMS threshold (on [-1, 1] normalized samples) for the near-field gate.
    pub asr_nearfield_rms_threshold: f64,
    /// Log a line for every stride the near-field gate drops.
    pub asr_nearfield_filter_log_enabled: bool,
    /// Enable language-model rescoring in engines that support it.
    pub asr_enable_lm: bool,
    /// Language model interpolation weight.
    pub lm_weight: f64,
    /// Language model decode beam size.
    pub lm_beam_size: u32,
    /// Per-inference-call timeout in seconds.
    pub engine_timeout_secs: u64,
    /// Worker-pool permits per configured engine.
    pub workers_per_engine: usize,
    /// Path to a GGML whisper model, for the `local-whisper` backend.
    pub whisper_model_path: Option<String>,
}

impl Settings {
    /// Loads settings from the process environment, layered over defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000)?
            .set_default("temp_dir", "temp")?
            .set_default("max_audio_size", 10_i64 * 1024 * 1024 * 1024)?
            .set_default("max_segment_sec", 6.0)?
            .set_default("min_segment_sec", 0.8)?
            .set_default("default_asr_model_id", "sensevoice-small")?
            .set_default("asr_model_mode", "all")?
            .set_default("asr_enable_nearfield_filter", true)?
            .set_default("asr_nearfield_rms_threshold", 0.01)?
            .set_default("asr_nearfield_filter_log_enabled", true)?
            .set_default("asr_enable_lm", true)?
            .set_default("lm_weight", 0.15)?
            .set_default("lm_beam_size", 10)?
            .set_default("engine_timeout_secs", 7200)?
            .set_default("workers_per_engine", 2)
    }
}
