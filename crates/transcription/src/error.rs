use thiserror::Error;

/// Wire status codes carried in response envelopes and event headers.
pub const STATUS_SUCCESS: u32 = 20_000_000;
pub const STATUS_AUTH_FAILED: u32 = 40_000_001;
pub const STATUS_INVALID_MESSAGE: u32 = 40_000_010;
pub const STATUS_SERVER_ERROR: u32 = 50_000_000;

/// Errors raised by the transcription pipeline.
///
/// Low-level components raise these typed variants; the API layer converts
/// them into response envelopes with a stable status code.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request: empty audio, oversized upload, unsupported format.
    #[error("{0}")]
    InvalidMessage(String),
    /// The requested model cannot load or is not configured in the current mode.
    #[error("{0}")]
    EngineUnavailable(String),
    /// Inference raised. Never auto-retried.
    #[error("engine failure: {0}")]
    EngineFailure(#[source] anyhow::Error),
    /// Temporary OS-level issue (disk full, timeout). Operator-retry.
    #[error("{0}")]
    Transient(String),
}

impl PipelineError {
    /// The envelope status code for this error.
    pub fn status(&self) -> u32 {
        match self {
            PipelineError::InvalidMessage(_) | PipelineError::EngineUnavailable(_) => {
                STATUS_INVALID_MESSAGE
            }
            PipelineError::EngineFailure(_) | PipelineError::Transient(_) => STATUS_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
