use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod audio;
mod engine_kind;
mod error;
pub mod loader;
pub mod pocket;
#[cfg(feature = "python")]
pub mod python;
pub mod qwen;
pub mod relay;
pub mod voices;

pub use audio::Waveform;
pub use engine_kind::EngineKind;
pub use error::TtsEngineError;
pub use pocket::{PocketEngine, PocketModel};
pub use qwen::{CustomVoiceRequest, QwenEngine, QwenModel};
pub use relay::{StreamEvent, StreamHandle};
pub use voices::{VoiceEntry, VoiceRegistry};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub instruct: Option<String>,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    fn validate(&self) -> Result<(), TtsEngineError> {
        if self.text.trim().is_empty() {
            return Err(TtsEngineError::Validation("Empty text".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TtsResponse {
    pub audio_base64: String,
    pub sample_rate: u32,
    pub duration: f64,
}

impl TtsResponse {
    pub fn from_waveform(waveform: &Waveform) -> Result<Self, TtsEngineError> {
        Ok(Self {
            audio_base64: waveform
                .to_base64_wav()
                .map_err(TtsEngineError::synthesis)?,
            sample_rate: waveform.sample_rate,
            duration: waveform.duration(),
        })
    }
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    /// Name reported by the health endpoint.
    fn model_name(&self) -> &str;
    fn voices(&self) -> &'static VoiceRegistry;
    fn is_loaded(&self) -> bool;
    /// Loads the model (and whatever per-voice state the default voice needs).
    async fn preload(&self) -> Result<(), TtsEngineError>;
    async fn synthesize(&self, request: TtsRequest) -> Result<TtsResponse, TtsEngineError>;
    /// Validates up front, then relays chunks from a background producer.
    fn synthesize_stream(&self, request: TtsRequest) -> Result<StreamHandle, TtsEngineError>;
}

pub(crate) fn join_error(err: tokio::task::JoinError) -> TtsEngineError {
    TtsEngineError::Synthesis(format!("synthesis worker failed: {err}"))
}

pub(crate) fn preview_text(value: &str) -> String {
    const LIMIT: usize = 80;
    let trimmed = value.trim();
    let mut preview: String = trimmed.chars().take(LIMIT).collect();
    if trimmed.chars().count() > LIMIT {
        preview.push('…');
    }
    preview
}
