use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, mpsc};
use tracing::{debug, info};

use crate::asr::sliding_window::SlidingWindowRealtime;
use crate::asr::{
    AsrEngine, AsrRequest, AsrResult, DecodeOptions, RealtimeAsrEngine, RealtimeEvent,
    RealtimeOptions,
};
use crate::config::TranscriptionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{PipelineError, PipelineResult};

/// What an engine can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCapability {
    Realtime,
    Offline,
    Both,
}

impl EngineCapability {
    pub fn offline(self) -> bool {
        matches!(self, Self::Offline | Self::Both)
    }

    pub fn realtime(self) -> bool {
        matches!(self, Self::Realtime | Self::Both)
    }
}

/// Which engine capabilities this process may load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelMode {
    Realtime,
    Offline,
    #[default]
    All,
}

impl ModelMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "realtime" => Some(Self::Realtime),
            "offline" => Some(Self::Offline),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn admits(self, capability: EngineCapability) -> bool {
        match self {
            Self::All => true,
            Self::Offline => capability.offline(),
            Self::Realtime => capability.realtime(),
        }
    }
}

/// The sides an engine exposes once loaded.
#[derive(Clone)]
pub struct LoadedEngine {
    pub offline: Option<Arc<dyn AsrEngine>>,
    pub realtime: Option<Arc<dyn RealtimeAsrEngine>>,
}

/// Builds an engine on first use.
#[async_trait]
pub trait EngineLoader: Send + Sync + 'static {
    async fn load(&self, options: &DecodeOptions) -> anyhow::Result<LoadedEngine>;
}

/// Declares one engine the registry can serve.
pub struct EngineSpec {
    pub id: String,
    pub capability: EngineCapability,
    pub languages: Vec<String>,
    pub loader: Arc<dyn EngineLoader>,
}

/// A registered engine: metadata plus lazy-loaded backends.
///
/// The `lock` serializes every inference on this engine, batch or
/// streaming; the `cell` guarantees concurrent first users trigger exactly
/// one load and wait on the same future.
pub struct EngineHandle {
    pub id: String,
    pub capability: EngineCapability,
    pub languages: Vec<String>,
    loader: Arc<dyn EngineLoader>,
    cell: OnceCell<LoadedEngine>,
    lock: Arc<Mutex<()>>,
}

impl EngineHandle {
    fn new(spec: EngineSpec) -> Self {
        Self {
            id: spec.id,
            capability: spec.capability,
            languages: spec.languages,
            loader: spec.loader,
            cell: OnceCell::new(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub fn inference_lock(&self) -> Arc<Mutex<()>> {
        self.lock.clone()
    }

    async fn engine(&self, options: &DecodeOptions) -> PipelineResult<&LoadedEngine> {
        self.cell
            .get_or_try_init(|| async {
                info!(engine = %self.id, "loading engine");
                self.loader.load(options).await
            })
            .await
            .map_err(|e| {
                PipelineError::EngineUnavailable(format!("failed to load engine '{}': {e}", self.id))
            })
    }

    /// Runs one offline inference through the worker pool, serialized with
    /// every other inference on this handle and bounded by `timeout`.
    ///
    /// The engine lock is taken inside the dispatched call, so a queued
    /// inference holds a worker permit while it waits its turn.
    pub async fn transcribe(
        &self,
        dispatcher: &Dispatcher,
        options: &DecodeOptions,
        request: AsrRequest,
        timeout: Duration,
    ) -> PipelineResult<AsrResult> {
        let loaded = self.engine(options).await?;
        let offline = loaded.offline.clone().ok_or_else(|| {
            PipelineError::EngineUnavailable(format!(
                "engine '{}' has no offline backend",
                self.id
            ))
        })?;

        let lock = self.lock.clone();
        let id = self.id.clone();
        dispatcher
            .run(move || async move {
                let _guard = lock.lock().await;
                match tokio::time::timeout(timeout, offline.transcribe(request)).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => Err(PipelineError::EngineFailure(e)),
                    Err(_) => Err(PipelineError::Transient(format!(
                        "engine '{id}' timed out after {}s",
                        timeout.as_secs()
                    ))),
                }
            })
            .await
    }
}

/// Registry entry surfaced by `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub capability: EngineCapability,
    pub languages: Vec<String>,
    pub loaded: bool,
}

/// Owns the bank of ASR engines.
///
/// External IDs (including OpenAI-style aliases) map onto canonical engine
/// IDs; engines load lazily on first use and are filtered by the configured
/// mode.
pub struct EngineRegistry {
    handles: HashMap<String, Arc<EngineHandle>>,
    order: Vec<String>,
    default_id: String,
    mode: ModelMode,
    decode_options: DecodeOptions,
    config: TranscriptionConfig,
    dispatcher: Arc<Dispatcher>,
}

impl EngineRegistry {
    pub fn new(
        specs: Vec<EngineSpec>,
        default_id: impl Into<String>,
        mode: ModelMode,
        decode_options: DecodeOptions,
        config: TranscriptionConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let mut handles = HashMap::new();
        let mut order = Vec::new();
        for spec in specs {
            order.push(spec.id.clone());
            handles.insert(spec.id.clone(), Arc::new(EngineHandle::new(spec)));
        }
        Self {
            handles,
            order,
            default_id: default_id.into(),
            mode,
            decode_options,
            config,
            dispatcher,
        }
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn engine_count(&self) -> usize {
        self.handles.len()
    }

    /// Maps an external model ID onto a canonical engine ID. `whisper*`
    /// aliases and unknown IDs both resolve to the default engine.
    pub fn map_id<'a>(&'a self, external: Option<&'a str>) -> &'a str {
        match external {
            Some(id) if self.handles.contains_key(id) => id,
            Some(id) => {
                debug!(external = id, default = %self.default_id, "aliasing model id");
                &self.default_id
            }
            None => &self.default_id,
        }
    }

    /// Resolves a handle, enforcing the configured mode.
    pub fn get(&self, external: Option<&str>) -> PipelineResult<Arc<EngineHandle>> {
        let id = self.map_id(external);
        let handle = self.handles.get(id).ok_or_else(|| {
            PipelineError::EngineUnavailable(format!("no engine registered for '{id}'"))
        })?;
        if !self.mode.admits(handle.capability) {
            return Err(PipelineError::EngineUnavailable(format!(
                "engine '{}' is not available in {:?} mode",
                handle.id, self.mode
            )));
        }
        Ok(handle.clone())
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        self.order
            .iter()
            .filter_map(|id| self.handles.get(id))
            .filter(|h| self.mode.admits(h.capability))
            .map(|h| ModelInfo {
                id: h.id.clone(),
                capability: h.capability,
                languages: h.languages.clone(),
                loaded: h.loaded(),
            })
            .collect()
    }

    /// Runs one offline inference on the engine `external` resolves to.
    pub async fn transcribe(
        &self,
        external: Option<&str>,
        request: AsrRequest,
    ) -> PipelineResult<AsrResult> {
        let handle = self.get(external)?;
        self.transcribe_on(&handle, request).await
    }

    /// Runs one offline inference on an already-resolved handle.
    pub async fn transcribe_on(
        &self,
        handle: &EngineHandle,
        request: AsrRequest,
    ) -> PipelineResult<AsrResult> {
        if !handle.capability.offline() {
            return Err(PipelineError::EngineUnavailable(format!(
                "engine '{}' does not support offline transcription",
                handle.id
            )));
        }
        handle
            .transcribe(
                &self.dispatcher,
                &self.decode_options,
                request,
                Duration::from_secs(self.config.engine_timeout_secs),
            )
            .await
    }

    /// Starts a realtime session on the engine `external` resolves to.
    ///
    /// Engines without a native realtime backend are served through the
    /// sliding-window adapter over their offline backend, sharing the
    /// handle's inference lock.
    pub async fn start_realtime(
        &self,
        external: Option<&str>,
        options: RealtimeOptions,
    ) -> PipelineResult<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<RealtimeEvent>)> {
        let handle = self.get(external)?;
        if !handle.capability.realtime() {
            return Err(PipelineError::EngineUnavailable(format!(
                "engine '{}' does not support realtime transcription",
                handle.id
            )));
        }

        let loaded = handle.engine(&self.decode_options).await?;
        if let Some(realtime) = &loaded.realtime {
            return realtime
                .start_session(options)
                .await
                .map_err(PipelineError::EngineFailure);
        }
        if let Some(offline) = &loaded.offline {
            let adapter = SlidingWindowRealtime::new(
                offline.clone(),
                self.config.clone(),
                handle.inference_lock(),
                self.dispatcher.clone(),
            );
            return adapter
                .start_session(options)
                .await
                .map_err(PipelineError::EngineFailure);
        }
        Err(PipelineError::EngineUnavailable(format!(
            "engine '{}' loaded no usable backend",
            handle.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct SlowEngine {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsrEngine for SlowEngine {
        async fn transcribe(&self, _request: AsrRequest) -> anyhow::Result<AsrResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(AsrResult {
                text: "ok".to_string(),
                segments: Vec::new(),
                language: None,
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct TestLoader {
        loads: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EngineLoader for TestLoader {
        async fn load(&self, _options: &DecodeOptions) -> anyhow::Result<LoadedEngine> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(LoadedEngine {
                offline: Some(Arc::new(SlowEngine {
                    running: self.running.clone(),
                    peak: self.peak.clone(),
                })),
                realtime: None,
            })
        }
    }

    fn test_registry(mode: ModelMode, capability: EngineCapability) -> (EngineRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let spec = EngineSpec {
            id: "sensevoice-small".to_string(),
            capability,
            languages: vec!["zh".to_string(), "en".to_string()],
            loader: Arc::new(TestLoader {
                loads: loads.clone(),
                peak: peak.clone(),
                running,
            }),
        };
        let registry = EngineRegistry::new(
            vec![spec],
            "sensevoice-small",
            mode,
            DecodeOptions::default(),
            TranscriptionConfig::default(),
            Arc::new(Dispatcher::new(4)),
        );
        (registry, loads, peak)
    }

    #[test]
    fn aliases_resolve_to_default() {
        let (registry, _, _) = test_registry(ModelMode::All, EngineCapability::Both);
        assert_eq!(registry.map_id(None), "sensevoice-small");
        assert_eq!(registry.map_id(Some("whisper-1")), "sensevoice-small");
        assert_eq!(
            registry.map_id(Some("Systran/faster-whisper-large-v2")),
            "sensevoice-small"
        );
        assert_eq!(registry.map_id(Some("sensevoice-small")), "sensevoice-small");
        assert_eq!(registry.map_id(Some("no-such-model")), "sensevoice-small");
    }

    #[test]
    fn mode_filters_capabilities() {
        let (registry, _, _) = test_registry(ModelMode::Realtime, EngineCapability::Offline);
        assert!(matches!(
            registry.get(None),
            Err(PipelineError::EngineUnavailable(_))
        ));
        assert!(registry.list().is_empty());

        let (registry, _, _) = test_registry(ModelMode::Offline, EngineCapability::Both);
        assert!(registry.get(None).is_ok());
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_use_loads_once() {
        let (registry, loads, _) = test_registry(ModelMode::All, EngineCapability::Both);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .transcribe(None, AsrRequest::new(vec![0.0; 160]))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_engine_inference_is_serialized() {
        let (registry, _, peak) = test_registry(ModelMode::All, EngineCapability::Both);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .transcribe(Some("whisper-1"), AsrRequest::new(vec![0.0; 160]))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1, "engine was re-entered");
    }

    #[tokio::test]
    async fn worker_pool_bounds_inference_across_engines() {
        // Two independent engines, one worker permit: the dispatcher must
        // keep global inference at one even though the handle locks alone
        // would allow two in flight
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let specs = ["alpha", "beta"]
            .iter()
            .map(|id| EngineSpec {
                id: id.to_string(),
                capability: EngineCapability::Both,
                languages: vec!["en".to_string()],
                loader: Arc::new(TestLoader {
                    loads: Arc::new(AtomicUsize::new(0)),
                    peak: peak.clone(),
                    running: running.clone(),
                }),
            })
            .collect();
        let registry = Arc::new(EngineRegistry::new(
            specs,
            "alpha",
            ModelMode::All,
            DecodeOptions::default(),
            TranscriptionConfig::default(),
            Arc::new(Dispatcher::new(1)),
        ));

        let mut handles = Vec::new();
        for i in 0..6 {
            let registry = registry.clone();
            let model = if i % 2 == 0 { "alpha" } else { "beta" };
            handles.push(tokio::spawn(async move {
                registry
                    .transcribe(Some(model), AsrRequest::new(vec![0.0; 160]))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1, "worker pool was bypassed");
    }

    #[tokio::test]
    async fn realtime_on_offline_engine_uses_adapter() {
        let (registry, _, _) = test_registry(ModelMode::All, EngineCapability::Both);
        let (audio_tx, mut events) = registry
            .start_realtime(None, RealtimeOptions::default())
            .await
            .unwrap();
        drop(audio_tx);
        assert!(events.recv().await.is_none());
    }
}
