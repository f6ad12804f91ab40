use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{PipelineError, PipelineResult};

/// Bounded worker pool for model and codec work.
///
/// The I/O scheduler never runs inference or decoding inline: sync
/// CPU-bound work (container decode, segment cutting) goes through
/// [`Dispatcher::run_blocking`] onto the blocking thread pool, and engine
/// calls go through [`Dispatcher::run`], which holds a permit for the
/// whole inference so total pressure stays bounded even across engines.
pub struct Dispatcher {
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Creates a pool with `workers` permits (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs `f` on the blocking thread pool and awaits its result.
    pub async fn run_blocking<F, T>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> PipelineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Transient("worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| PipelineError::Transient(format!("worker task join error: {e}")))?
    }

    /// Awaits the future produced by `f` while holding one worker permit.
    ///
    /// Used for engine inference: the closure acquires the engine's own
    /// lock and runs the call, so per-engine serialization and the global
    /// worker bound are both enforced here.
    pub async fn run<F, Fut, T>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::Transient("worker pool closed".to_string()))?;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let dispatcher = Arc::new(Dispatcher::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = dispatcher.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .run_blocking(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn async_calls_share_the_same_permit_pool() {
        let dispatcher = Arc::new(Dispatcher::new(1));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dispatcher = dispatcher.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .run(|| async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn propagates_errors() {
        let dispatcher = Dispatcher::new(1);
        let err = dispatcher
            .run_blocking(|| -> PipelineResult<()> {
                Err(PipelineError::InvalidMessage("bad input".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMessage(_)));
    }
}
