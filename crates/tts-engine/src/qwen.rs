use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tokio::task;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    join_error,
    loader::LazyModel,
    preview_text,
    relay::{spawn_producer, ChunkSender, StreamEnd, StreamHandle},
    voices::{VoiceEntry, VoiceRegistry, QWEN_SPEAKERS},
    EngineKind, TtsEngine, TtsEngineError, TtsRequest, TtsResponse, Waveform,
};

pub const DEFAULT_QWEN_MODEL: &str = "Qwen/Qwen3-TTS-12Hz-0.6B-CustomVoice";
pub const DEFAULT_LANGUAGE: &str = "English";

/// Arguments for one `generate_custom_voice` call. Sampling is always off.
#[derive(Clone, Debug, PartialEq)]
pub struct CustomVoiceRequest<'a> {
    pub text: &'a str,
    /// Lower-cased speaker key as the Qwen library expects it.
    pub speaker: String,
    pub language: &'a str,
    pub instruct: Option<&'a str>,
}

pub trait QwenModel: Send + Sync + 'static {
    fn generate_custom_voice(&self, request: &CustomVoiceRequest<'_>) -> anyhow::Result<Waveform>;
}

type Loader<M> = Box<dyn Fn(&str) -> anyhow::Result<M> + Send + Sync>;

pub struct QwenEngine<M: QwenModel> {
    inner: Arc<QwenInner<M>>,
}

impl<M: QwenModel> Clone for QwenEngine<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct QwenInner<M: QwenModel> {
    model: LazyModel<M>,
    loader: Loader<M>,
    model_name: String,
    registry: &'static VoiceRegistry,
    stream_buffer: usize,
}

impl<M: QwenModel> QwenEngine<M> {
    /// `loader` receives the model id and runs on first use.
    pub fn new<F>(model_name: impl Into<String>, loader: F, stream_buffer: usize) -> Self
    where
        F: Fn(&str) -> anyhow::Result<M> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(QwenInner {
                model: LazyModel::new(EngineKind::Qwen3Tts),
                loader: Box::new(loader),
                model_name: model_name.into(),
                registry: &QWEN_SPEAKERS,
                stream_buffer,
            }),
        }
    }
}

impl<M: QwenModel> QwenInner<M> {
    fn model(&self) -> Result<Arc<M>, TtsEngineError> {
        self.model.get_or_load(|| (self.loader)(&self.model_name))
    }

    fn generate(
        &self,
        request: &TtsRequest,
        voice: &'static VoiceEntry,
    ) -> Result<Waveform, TtsEngineError> {
        let started = Instant::now();
        let model = self.model()?;
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE);
        let params = CustomVoiceRequest {
            text: &request.text,
            speaker: voice.id.to_lowercase(),
            language,
            instruct: request.instruct.as_deref(),
        };
        let waveform = model
            .generate_custom_voice(&params)
            .map_err(TtsEngineError::synthesis)?;
        info!(
            target = "local_tts::qwen",
            speaker = %params.speaker,
            language,
            duration_secs = waveform.duration(),
            elapsed_ms = started.elapsed().as_millis(),
            "generated audio"
        );
        Ok(waveform)
    }

    // The library has no incremental interface here, so the whole clip goes
    // out as one chunk already marked done.
    fn stream_blocking(
        &self,
        request: &TtsRequest,
        voice: &'static VoiceEntry,
        sink: &ChunkSender,
    ) -> Result<StreamEnd, TtsEngineError> {
        let waveform = self.generate(request, voice)?;
        let _ = sink.send_waveform(&waveform, true)?;
        Ok(StreamEnd::AlreadyDone)
    }
}

#[async_trait]
impl<M: QwenModel> TtsEngine for QwenEngine<M> {
    fn kind(&self) -> EngineKind {
        EngineKind::Qwen3Tts
    }

    fn model_name(&self) -> &str {
        &self.inner.model_name
    }

    fn voices(&self) -> &'static VoiceRegistry {
        self.inner.registry
    }

    fn is_loaded(&self) -> bool {
        self.inner.model.is_loaded()
    }

    async fn preload(&self) -> Result<(), TtsEngineError> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.model().map(|_| ()))
            .await
            .map_err(join_error)?
    }

    #[instrument(skip(self, request), fields(request_id = %Uuid::new_v4()))]
    async fn synthesize(&self, request: TtsRequest) -> Result<TtsResponse, TtsEngineError> {
        request.validate()?;
        let voice = self.inner.registry.resolve(request.speaker.as_deref());
        info!(
            target = "local_tts::qwen",
            chars = request.text.chars().count(),
            speaker = %voice.id,
            text_preview = %preview_text(&request.text),
            "generating speech"
        );

        let inner = self.inner.clone();
        let waveform = task::spawn_blocking(move || inner.generate(&request, voice))
            .await
            .map_err(join_error)??;
        TtsResponse::from_waveform(&waveform)
    }

    fn synthesize_stream(&self, request: TtsRequest) -> Result<StreamHandle, TtsEngineError> {
        request.validate()?;
        let voice = self.inner.registry.resolve(request.speaker.as_deref());
        info!(
            target = "local_tts::qwen",
            chars = request.text.chars().count(),
            speaker = %voice.id,
            "streaming speech"
        );

        let inner = self.inner.clone();
        Ok(spawn_producer(self.inner.stream_buffer, move |sink| {
            inner.stream_blocking(&request, voice, sink)
        }))
    }
}
