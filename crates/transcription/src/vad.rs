use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::audio::{rms, wav};
use crate::error::{PipelineError, PipelineResult};

/// A half-open voice region `[start_ms, end_ms)`.
pub type VoiceRegion = (u64, u64);

/// Opaque voice-activity-detection engine.
///
/// Returns non-overlapping regions sorted by start. An empty result means
/// "no speech found" and is distinct from failure.
#[async_trait]
pub trait VadEngine: Send + Sync + 'static {
    async fn detect(&self, audio_path: &Path) -> anyhow::Result<Vec<VoiceRegion>>;

    fn name(&self) -> &str;
}

/// Serializes access to a shared VAD engine.
///
/// The engine is a single heavyweight resource; concurrent callers queue on
/// the client's lock rather than re-entering the engine.
pub struct VadClient {
    engine: Arc<dyn VadEngine>,
    lock: Mutex<()>,
}

impl VadClient {
    pub fn new(engine: Arc<dyn VadEngine>) -> Self {
        Self {
            engine,
            lock: Mutex::new(()),
        }
    }

    /// Runs voice activity detection on `audio_path`.
    pub async fn detect(&self, audio_path: &Path) -> PipelineResult<Vec<VoiceRegion>> {
        let _guard = self.lock.lock().await;
        let regions = self
            .engine
            .detect(audio_path)
            .await
            .map_err(PipelineError::EngineFailure)?;
        debug!(
            engine = self.engine.name(),
            count = regions.len(),
            "voice regions detected"
        );
        Ok(regions)
    }
}

/// Energy-threshold VAD over fixed windows.
///
/// Serves as the built-in detector when no external VAD engine is wired in:
/// windows whose RMS clears the threshold are voiced, voiced runs separated
/// by less than `min_silence_ms` merge into one region, and regions shorter
/// than `min_region_ms` are discarded.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    pub threshold: f32,
    pub window_ms: u64,
    pub min_silence_ms: u64,
    pub min_region_ms: u64,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            window_ms: 30,
            min_silence_ms: 300,
            min_region_ms: 120,
        }
    }
}

impl EnergyVad {
    fn regions_from_samples(&self, samples: &[i16]) -> Vec<VoiceRegion> {
        let window = (self.window_ms * 16) as usize; // samples per window at 16 kHz
        if window == 0 || samples.is_empty() {
            return Vec::new();
        }

        let mut raw: Vec<VoiceRegion> = Vec::new();
        let mut current: Option<(u64, u64)> = None;

        for (index, chunk) in samples.chunks(window).enumerate() {
            let start_ms = index as u64 * self.window_ms;
            let end_ms = start_ms + (chunk.len() as u64 * 1000) / 16_000;
            if rms(chunk) >= self.threshold {
                current = match current {
                    Some((s, _)) => Some((s, end_ms)),
                    None => Some((start_ms, end_ms)),
                };
            } else if let Some(region) = current.take() {
                raw.push(region);
            }
        }
        if let Some(region) = current {
            raw.push(region);
        }

        // Merge regions separated by short silences, then drop slivers
        let mut merged: Vec<VoiceRegion> = Vec::new();
        for region in raw {
            match merged.last_mut() {
                Some(last) if region.0.saturating_sub(last.1) < self.min_silence_ms => {
                    last.1 = region.1;
                }
                _ => merged.push(region),
            }
        }
        merged.retain(|(s, e)| e - s >= self.min_region_ms);
        merged
    }
}

#[async_trait]
impl VadEngine for EnergyVad {
    async fn detect(&self, audio_path: &Path) -> anyhow::Result<Vec<VoiceRegion>> {
        let path: PathBuf = audio_path.to_path_buf();
        let vad = self.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<VoiceRegion>> {
            let audio = wav::read_wav(&path)?;
            Ok(vad.regions_from_samples(&audio.samples))
        })
        .await?
    }

    fn name(&self) -> &str {
        "energy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(ms: u64, amplitude: i16) -> Vec<i16> {
        (0..ms * 16)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn silence_yields_no_regions() {
        let vad = EnergyVad::default();
        assert!(vad.regions_from_samples(&vec![0; 16_000]).is_empty());
    }

    #[test]
    fn detects_voiced_span_between_silences() {
        let vad = EnergyVad::default();
        let mut samples = tone(1000, 0);
        samples.extend(tone(2000, 8000));
        samples.extend(tone(1000, 0));

        let regions = vad.regions_from_samples(&samples);
        assert_eq!(regions.len(), 1);
        let (start, end) = regions[0];
        assert!((900..=1100).contains(&start), "start was {start}");
        assert!((2900..=3100).contains(&end), "end was {end}");
    }

    #[test]
    fn short_gaps_merge_into_one_region() {
        let vad = EnergyVad::default();
        let mut samples = tone(500, 8000);
        samples.extend(tone(100, 0)); // below min_silence_ms
        samples.extend(tone(500, 8000));

        let regions = vad.regions_from_samples(&samples);
        assert_eq!(regions.len(), 1);
    }

    #[tokio::test]
    async fn client_serializes_and_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speech.wav");
        let mut samples = tone(500, 0);
        samples.extend(tone(1000, 8000));
        wav::write_wav(&path, &samples).unwrap();

        let client = VadClient::new(Arc::new(EnergyVad::default()));
        let regions = client.detect(&path).await.unwrap();
        assert_eq!(regions.len(), 1);
    }
}
