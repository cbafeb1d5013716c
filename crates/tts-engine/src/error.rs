use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsEngineError {
    /// The request itself is unusable (blank text and the like).
    #[error("{0}")]
    Validation(String),
    /// The model or a voice state could not be constructed.
    #[error("{0}")]
    ModelUnavailable(String),
    #[error("{0}")]
    Synthesis(String),
}

impl TtsEngineError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, TtsEngineError::Validation(_))
    }

    pub(crate) fn synthesis(err: anyhow::Error) -> Self {
        TtsEngineError::Synthesis(format!("{err:#}"))
    }

    pub(crate) fn unavailable(err: anyhow::Error) -> Self {
        TtsEngineError::ModelUnavailable(format!("{err:#}"))
    }
}
