use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::{AsrEngine, AsrRequest, RealtimeAsrEngine, RealtimeEvent, RealtimeOptions};
use crate::audio::rms;
use crate::config::TranscriptionConfig;
use crate::dispatch::Dispatcher;
use crate::error::PipelineError;

/// Realtime adapter over an offline engine.
///
/// Runs an energy endpointer on incoming strides: a voiced stride opens an
/// utterance, accumulated audio is periodically re-transcribed for partial
/// results, and a run of silent strides (or the max-sentence cap) closes
/// the utterance with one final transcription.
///
/// Inference goes through the shared worker pool and holds the owning
/// engine handle's lock, so a streaming session never overlaps a batch
/// call on the same engine.
pub struct SlidingWindowRealtime {
    inner: Arc<dyn AsrEngine>,
    config: TranscriptionConfig,
    inference_lock: Arc<Mutex<()>>,
    dispatcher: Arc<Dispatcher>,
}

impl SlidingWindowRealtime {
    pub fn new(
        inner: Arc<dyn AsrEngine>,
        config: TranscriptionConfig,
        inference_lock: Arc<Mutex<()>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            inner,
            config,
            inference_lock,
            dispatcher,
        }
    }
}

#[async_trait]
impl RealtimeAsrEngine for SlidingWindowRealtime {
    async fn start_session(
        &self,
        options: RealtimeOptions,
    ) -> anyhow::Result<(mpsc::Sender<Vec<i16>>, mpsc::Receiver<RealtimeEvent>)> {
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<i16>>(32);
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(64);

        let worker = SessionWorker {
            inner: self.inner.clone(),
            config: self.config.clone(),
            inference_lock: self.inference_lock.clone(),
            dispatcher: self.dispatcher.clone(),
            options,
        };
        tokio::spawn(worker.run(audio_rx, event_tx));

        Ok((audio_tx, event_rx))
    }

    fn name(&self) -> &str {
        "sliding-window"
    }
}

struct SessionWorker {
    inner: Arc<dyn AsrEngine>,
    config: TranscriptionConfig,
    inference_lock: Arc<Mutex<()>>,
    dispatcher: Arc<Dispatcher>,
    options: RealtimeOptions,
}

impl SessionWorker {
    async fn run(
        self,
        mut audio_rx: mpsc::Receiver<Vec<i16>>,
        event_tx: mpsc::Sender<RealtimeEvent>,
    ) {
        let mut clock_samples: u64 = 0;
        let mut speech_active = false;
        let mut begin_ms: u64 = 0;
        let mut buffer: Vec<f32> = Vec::new();
        let mut silence_run: usize = 0;
        let mut samples_since_partial: usize = 0;

        let partial_interval_samples =
            (self.config.partial_interval_ms as usize) * 16;
        let max_sentence_samples = (self.config.max_sentence_secs * 16_000.0) as usize;

        while let Some(chunk) = audio_rx.recv().await {
            let pcm = self.to_canonical(&chunk);
            let chunk_start_ms = clock_samples / 16;
            clock_samples += pcm.len() as u64;
            let voiced = rms(&chunk) >= self.config.endpoint_rms_threshold;

            if voiced {
                if !speech_active {
                    speech_active = true;
                    begin_ms = chunk_start_ms;
                    buffer.clear();
                    samples_since_partial = 0;
                    debug!(begin_ms, "utterance opened");
                    if event_tx
                        .send(RealtimeEvent::SentenceBegin { begin_ms })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                silence_run = 0;
                buffer.extend_from_slice(&pcm);
                samples_since_partial += pcm.len();

                if samples_since_partial >= partial_interval_samples
                    && buffer.len() >= self.config.min_partial_samples
                {
                    samples_since_partial = 0;
                    match self.transcribe(buffer.clone()).await {
                        Ok(text) => {
                            if !text.is_empty()
                                && event_tx
                                    .send(RealtimeEvent::Partial { text })
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = event_tx
                                .send(RealtimeEvent::Error {
                                    message: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    }
                }

                if buffer.len() >= max_sentence_samples {
                    let end_ms = clock_samples / 16;
                    if self
                        .finalize(&event_tx, &mut buffer, begin_ms, end_ms)
                        .await
                        .is_err()
                    {
                        return;
                    }
                    speech_active = false;
                }
            } else if speech_active {
                // Keep trailing context so the final pass hears the decay
                buffer.extend_from_slice(&pcm);
                silence_run += 1;
                if silence_run >= self.config.endpoint_silence_strides {
                    let end_ms = clock_samples / 16;
                    if self
                        .finalize(&event_tx, &mut buffer, begin_ms, end_ms)
                        .await
                        .is_err()
                    {
                        return;
                    }
                    speech_active = false;
                    silence_run = 0;
                }
            }
        }

        // Input closed: flush any open utterance before draining
        if speech_active && !buffer.is_empty() {
            let end_ms = clock_samples / 16;
            let _ = self.finalize(&event_tx, &mut buffer, begin_ms, end_ms).await;
        }
        debug!("realtime adapter session drained");
    }

    /// Upsamples 8 kHz input by linear interpolation; 16 kHz passes through.
    fn to_canonical(&self, chunk: &[i16]) -> Vec<f32> {
        let normalized: Vec<f32> = chunk.iter().map(|&s| s as f32 / 32768.0).collect();
        if self.options.sample_rate == 8000 {
            let mut out = Vec::with_capacity(normalized.len() * 2);
            for window in normalized.windows(2) {
                out.push(window[0]);
                out.push((window[0] + window[1]) / 2.0);
            }
            if let Some(&last) = normalized.last() {
                out.push(last);
                out.push(last);
            }
            out
        } else {
            normalized
        }
    }

    async fn transcribe(&self, audio: Vec<f32>) -> anyhow::Result<String> {
        let request = AsrRequest {
            audio_pcm_16k_mono: audio,
            language_hint: self.options.language_hint.clone(),
            hotwords: None,
            enable_punctuation: self.options.enable_punctuation,
            enable_itn: self.options.enable_itn,
        };
        let inner = self.inner.clone();
        let lock = self.inference_lock.clone();
        let result = self
            .dispatcher
            .run(move || async move {
                let _guard = lock.lock().await;
                inner
                    .transcribe(request)
                    .await
                    .map_err(PipelineError::EngineFailure)
            })
            .await?;
        Ok(result.text.trim().to_string())
    }

    async fn finalize(
        &self,
        event_tx: &mpsc::Sender<RealtimeEvent>,
        buffer: &mut Vec<f32>,
        begin_ms: u64,
        end_ms: u64,
    ) -> Result<(), ()> {
        let audio = std::mem::take(buffer);
        let text = match self.transcribe(audio).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "final transcription failed");
                let _ = event_tx
                    .send(RealtimeEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return Err(());
            }
        };
        event_tx
            .send(RealtimeEvent::SentenceEnd {
                text,
                begin_ms,
                end_ms,
            })
            .await
            .map_err(|_| ())
    }
}
