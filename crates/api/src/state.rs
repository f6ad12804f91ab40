use std::sync::Arc;

use voxgate_config::Settings;
use voxgate_transcription::asr::DecodeOptions;
use voxgate_transcription::batch::BatchPipeline;
use voxgate_transcription::config::TranscriptionConfig;
use voxgate_transcription::dispatch::Dispatcher;
use voxgate_transcription::registry::{EngineRegistry, EngineSpec, ModelMode};
use voxgate_transcription::text::ItnNormalizer;
use voxgate_transcription::vad::{EnergyVad, VadClient, VadEngine};

#[cfg(not(feature = "local-whisper"))]
use async_trait::async_trait;
#[cfg(not(feature = "local-whisper"))]
use voxgate_transcription::registry::{EngineLoader, LoadedEngine};

/// Shared application services, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub config: TranscriptionConfig,
    pub registry: Arc<EngineRegistry>,
    pub pipeline: Arc<BatchPipeline>,
    pub itn: Option<Arc<dyn ItnNormalizer>>,
    /// Unix timestamp stamped on `/v1/models` entries.
    pub started_at: i64,
}

impl AppState {
    /// Builds the state with the default engine catalog and energy VAD.
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        let specs = default_catalog(&settings);
        Self::with_engines(settings, specs, Arc::new(EnergyVad::default()), None)
    }

    /// Builds the state around an explicit engine catalog; tests and
    /// embedders wire their own engines through here.
    pub fn with_engines(
        settings: Settings,
        specs: Vec<EngineSpec>,
        vad: Arc<dyn VadEngine>,
        itn: Option<Arc<dyn ItnNormalizer>>,
    ) -> anyhow::Result<Self> {
        let mode = ModelMode::parse(&settings.asr_model_mode).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid ASR_MODEL_MODE '{}', expected realtime|offline|all",
                settings.asr_model_mode
            )
        })?;

        let config = TranscriptionConfig {
            max_segment_sec: settings.max_segment_sec,
            min_segment_sec: settings.min_segment_sec,
            temp_dir: settings.temp_dir.clone(),
            nearfield_filter: settings.asr_enable_nearfield_filter,
            nearfield_rms_threshold: settings.asr_nearfield_rms_threshold as f32,
            nearfield_filter_log: settings.asr_nearfield_filter_log_enabled,
            engine_timeout_secs: settings.engine_timeout_secs,
            ..TranscriptionConfig::default()
        };

        let decode_options = DecodeOptions {
            enable_lm: settings.asr_enable_lm,
            lm_weight: settings.lm_weight,
            lm_beam_size: settings.lm_beam_size,
        };

        // One pool bounds every engine call, batch and streaming alike
        let workers = specs.len().max(1) * settings.workers_per_engine.max(1);
        let dispatcher = Arc::new(Dispatcher::new(workers));

        let registry = Arc::new(EngineRegistry::new(
            specs,
            settings.default_asr_model_id.clone(),
            mode,
            decode_options,
            config.clone(),
            dispatcher.clone(),
        ));
        let vad = Arc::new(VadClient::new(vad));
        let pipeline = Arc::new(BatchPipeline::new(
            registry.clone(),
            vad,
            dispatcher,
            config.clone(),
            itn.clone(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            config,
            registry,
            pipeline,
            itn,
            started_at: chrono::Utc::now().timestamp(),
        })
    }
}

#[cfg(feature = "local-whisper")]
fn default_catalog(settings: &Settings) -> Vec<EngineSpec> {
    use voxgate_transcription::asr::local_whisper::LocalWhisperLoader;
    use voxgate_transcription::registry::EngineCapability;

    let model_path = settings
        .whisper_model_path
        .clone()
        .unwrap_or_else(|| "models/ggml-base.bin".to_string());
    vec![EngineSpec {
        id: settings.default_asr_model_id.clone(),
        capability: EngineCapability::Both,
        languages: vec![
            "zh".to_string(),
            "en".to_string(),
            "yue".to_string(),
            "ja".to_string(),
            "ko".to_string(),
        ],
        loader: Arc::new(LocalWhisperLoader { model_path }),
    }]
}

#[cfg(not(feature = "local-whisper"))]
fn default_catalog(settings: &Settings) -> Vec<EngineSpec> {
    use voxgate_transcription::registry::EngineCapability;

    struct UnconfiguredLoader;

    #[async_trait]
    impl EngineLoader for UnconfiguredLoader {
        async fn load(&self, _options: &DecodeOptions) -> anyhow::Result<LoadedEngine> {
            anyhow::bail!("no ASR backend compiled in; rebuild with --features local-whisper")
        }
    }

    vec![EngineSpec {
        id: settings.default_asr_model_id.clone(),
        capability: EngineCapability::Both,
        languages: vec!["zh".to_string(), "en".to_string()],
        loader: Arc::new(UnconfiguredLoader),
    }]
}
