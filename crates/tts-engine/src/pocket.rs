use std::{ops::ControlFlow, sync::Arc, time::Instant};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::task;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    join_error,
    loader::{LazyModel, VoiceStateCache},
    preview_text,
    relay::{spawn_producer, ChunkSender, StreamEnd, StreamHandle},
    voices::{VoiceEntry, VoiceRegistry, POCKET_VOICES},
    EngineKind, TtsEngine, TtsEngineError, TtsRequest, TtsResponse, Waveform,
};

/// Pocket TTS always renders 24 kHz mono.
pub const POCKET_SAMPLE_RATE: u32 = 24_000;
pub const POCKET_MODEL_NAME: &str = "pocket-tts";

/// Receives each chunk of a streamed generation; `Break` stops the model.
pub type ChunkCallback<'a> = dyn FnMut(Vec<f32>) -> ControlFlow<()> + Send + 'a;

/// The calls the server makes into the Pocket TTS library.
pub trait PocketModel: Send + Sync + 'static {
    type VoiceState: Send + Sync + 'static;

    fn voice_state_for_prompt(&self, prompt: &str) -> anyhow::Result<Self::VoiceState>;

    fn generate_audio(&self, state: &Self::VoiceState, text: &str) -> anyhow::Result<Vec<f32>>;

    fn generate_audio_stream(
        &self,
        state: &Self::VoiceState,
        text: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> anyhow::Result<()>;
}

type Loader<M> = Box<dyn Fn() -> anyhow::Result<M> + Send + Sync>;

pub struct PocketEngine<M: PocketModel> {
    inner: Arc<PocketInner<M>>,
}

impl<M: PocketModel> Clone for PocketEngine<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct PocketInner<M: PocketModel> {
    model: LazyModel<M>,
    loader: Loader<M>,
    states: VoiceStateCache<M::VoiceState>,
    registry: &'static VoiceRegistry,
    stream_buffer: usize,
}

impl<M: PocketModel> PocketEngine<M> {
    /// `loader` runs once, on the first request that needs the model.
    pub fn new<F>(loader: F, stream_buffer: usize) -> Self
    where
        F: Fn() -> anyhow::Result<M> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PocketInner {
                model: LazyModel::new(EngineKind::PocketTts),
                loader: Box::new(loader),
                states: VoiceStateCache::new(),
                registry: &POCKET_VOICES,
                stream_buffer,
            }),
        }
    }

    pub fn cached_voice_states(&self) -> usize {
        self.inner.states.len()
    }
}

impl<M: PocketModel> PocketInner<M> {
    fn model(&self) -> Result<Arc<M>, TtsEngineError> {
        self.model.get_or_load(|| (self.loader)())
    }

    fn voice_state(
        &self,
        model: &M,
        voice: &VoiceEntry,
    ) -> Result<Arc<M::VoiceState>, TtsEngineError> {
        self.states.get_or_insert_with(voice.id, || {
            let prompt = voice
                .prompt
                .ok_or_else(|| anyhow!("voice '{}' has no audio prompt", voice.id))?;
            model
                .voice_state_for_prompt(prompt)
                .with_context(|| format!("failed to load voice state from {prompt}"))
        })
    }

    fn preload_blocking(&self) -> Result<(), TtsEngineError> {
        let model = self.model()?;
        self.voice_state(&model, self.registry.default_voice())?;
        Ok(())
    }

    fn synthesize_blocking(
        &self,
        text: &str,
        voice: &'static VoiceEntry,
    ) -> Result<Waveform, TtsEngineError> {
        let started = Instant::now();
        let model = self.model()?;
        let state = self.voice_state(&model, voice)?;
        let samples = model
            .generate_audio(&state, text)
            .map_err(TtsEngineError::synthesis)?;
        let waveform = Waveform::new(samples, POCKET_SAMPLE_RATE);
        info!(
            target = "local_tts::pocket",
            voice = %voice.id,
            duration_secs = waveform.duration(),
            elapsed_ms = started.elapsed().as_millis(),
            "generated audio"
        );
        Ok(waveform)
    }

    fn stream_blocking(
        &self,
        text: &str,
        voice: &'static VoiceEntry,
        sink: &ChunkSender,
    ) -> Result<StreamEnd, TtsEngineError> {
        let started = Instant::now();
        let model = self.model()?;
        let state = self.voice_state(&model, voice)?;

        let mut chunks = 0usize;
        let mut send_error = None;
        model
            .generate_audio_stream(&state, text, &mut |samples: Vec<f32>| {
                let waveform = Waveform::new(samples, POCKET_SAMPLE_RATE);
                match sink.send_waveform(&waveform, false) {
                    Ok(flow) => {
                        chunks += 1;
                        flow
                    }
                    Err(err) => {
                        send_error = Some(err);
                        ControlFlow::Break(())
                    }
                }
            })
            .map_err(TtsEngineError::synthesis)?;
        if let Some(err) = send_error {
            return Err(err);
        }

        info!(
            target = "local_tts::pocket",
            voice = %voice.id,
            chunks,
            elapsed_ms = started.elapsed().as_millis(),
            "stream complete"
        );
        Ok(StreamEnd::AppendDone)
    }
}

#[async_trait]
impl<M: PocketModel> TtsEngine for PocketEngine<M> {
    fn kind(&self) -> EngineKind {
        EngineKind::PocketTts
    }

    fn model_name(&self) -> &str {
        POCKET_MODEL_NAME
    }

    fn voices(&self) -> &'static VoiceRegistry {
        self.inner.registry
    }

    fn is_loaded(&self) -> bool {
        self.inner.model.is_loaded()
    }

    async fn preload(&self) -> Result<(), TtsEngineError> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.preload_blocking())
            .await
            .map_err(join_error)?
    }

    #[instrument(skip(self, request), fields(request_id = %Uuid::new_v4()))]
    async fn synthesize(&self, request: TtsRequest) -> Result<TtsResponse, TtsEngineError> {
        request.validate()?;
        let voice = self.inner.registry.resolve(request.speaker.as_deref());
        info!(
            target = "local_tts::pocket",
            chars = request.text.chars().count(),
            voice = %voice.id,
            text_preview = %preview_text(&request.text),
            "generating speech"
        );

        let inner = self.inner.clone();
        let waveform = task::spawn_blocking(move || inner.synthesize_blocking(&request.text, voice))
            .await
            .map_err(join_error)??;
        TtsResponse::from_waveform(&waveform)
    }

    fn synthesize_stream(&self, request: TtsRequest) -> Result<StreamHandle, TtsEngineError> {
        request.validate()?;
        let voice = self.inner.registry.resolve(request.speaker.as_deref());
        info!(
            target = "local_tts::pocket",
            chars = request.text.chars().count(),
            voice = %voice.id,
            "streaming speech"
        );

        let inner = self.inner.clone();
        Ok(spawn_producer(self.inner.stream_buffer, move |sink| {
            inner.stream_blocking(&request.text, voice, sink)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::decode_wav_base64, relay::StreamEvent};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        loads: AtomicUsize,
        state_builds: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    struct FakePocket {
        calls: Arc<Calls>,
        chunks: usize,
        fail_after: Option<usize>,
    }

    impl PocketModel for FakePocket {
        type VoiceState = String;

        fn voice_state_for_prompt(&self, prompt: &str) -> anyhow::Result<String> {
            self.calls.state_builds.fetch_add(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        }

        fn generate_audio(&self, state: &String, text: &str) -> anyhow::Result<Vec<f32>> {
            self.calls.prompts.lock().push(state.clone());
            Ok(vec![0.1; text.len() * 240])
        }

        fn generate_audio_stream(
            &self,
            state: &String,
            _text: &str,
            on_chunk: &mut ChunkCallback<'_>,
        ) -> anyhow::Result<()> {
            self.calls.prompts.lock().push(state.clone());
            for index in 0..self.chunks {
                if Some(index) == self.fail_after {
                    anyhow::bail!("vocoder ran out of memory");
                }
                if on_chunk(vec![0.2; 1200]).is_break() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn engine(chunks: usize, fail_after: Option<usize>) -> (PocketEngine<FakePocket>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let shared = calls.clone();
        let engine = PocketEngine::new(
            move || {
                shared.loads.fetch_add(1, Ordering::SeqCst);
                Ok(FakePocket {
                    calls: shared.clone(),
                    chunks,
                    fail_after,
                })
            },
            4,
        );
        (engine, calls)
    }

    #[tokio::test]
    async fn synthesize_returns_wav_at_pocket_rate() {
        let (engine, calls) = engine(0, None);
        let response = engine
            .synthesize(TtsRequest::new("hello").with_speaker("marius"))
            .await
            .unwrap();

        assert_eq!(response.sample_rate, POCKET_SAMPLE_RATE);
        assert!((response.duration - 0.05).abs() < 1e-9);
        let decoded = decode_wav_base64(&response.audio_base64).unwrap();
        assert_eq!(decoded.samples.len(), 1200);
        assert_eq!(
            calls.prompts.lock().clone(),
            vec!["hf://kyutai/tts-voices/marius/casual.wav".to_string()]
        );
    }

    #[tokio::test]
    async fn blank_text_never_touches_the_model() {
        let (engine, calls) = engine(0, None);
        let err = engine.synthesize(TtsRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, TtsEngineError::Validation(_)));
        assert!(engine.synthesize_stream(TtsRequest::new("")).is_err());
        assert_eq!(calls.loads.load(Ordering::SeqCst), 0);
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn voice_state_is_cached_per_voice() {
        let (engine, calls) = engine(0, None);
        for speaker in ["alba", "ALBA", "aiden", "unknown-voice"] {
            engine
                .synthesize(TtsRequest::new("hi").with_speaker(speaker))
                .await
                .unwrap();
        }
        engine
            .synthesize(TtsRequest::new("hi").with_speaker("javert"))
            .await
            .unwrap();

        assert_eq!(calls.loads.load(Ordering::SeqCst), 1);
        assert_eq!(calls.state_builds.load(Ordering::SeqCst), 2);
        assert_eq!(engine.cached_voice_states(), 2);
    }

    #[tokio::test]
    async fn legacy_alias_uses_target_voice() {
        let (engine, calls) = engine(0, None);
        let via_alias = engine
            .synthesize(TtsRequest::new("same text").with_speaker("sohee"))
            .await
            .unwrap();
        let direct = engine
            .synthesize(TtsRequest::new("same text").with_speaker("azelma"))
            .await
            .unwrap();

        assert_eq!(via_alias, direct);
        let prompts = calls.prompts.lock();
        assert_eq!(prompts[0], prompts[1]);
        assert!(prompts[0].contains("azelma"));
    }

    #[tokio::test]
    async fn stream_emits_chunks_then_done() {
        let (engine, _calls) = engine(3, None);
        let events = engine
            .synthesize_stream(TtsRequest::new("stream me"))
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        for event in &events[..3] {
            match event {
                StreamEvent::Chunk(chunk) => {
                    assert!(!chunk.done);
                    assert_eq!(chunk.sample_rate, POCKET_SAMPLE_RATE);
                    assert!((chunk.duration - 0.05).abs() < 1e-9);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(events[3], StreamEvent::Finished);
    }

    #[tokio::test]
    async fn stream_failure_is_reported_in_band() {
        let (engine, _calls) = engine(3, Some(1));
        let events = engine
            .synthesize_stream(TtsRequest::new("boom"))
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Chunk(_)));
        assert_eq!(
            events[1],
            StreamEvent::Failed("vocoder ran out of memory".into())
        );
    }

    #[tokio::test]
    async fn load_failure_maps_to_model_unavailable() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let engine: PocketEngine<FakePocket> = PocketEngine::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("weights not found"))
            },
            4,
        );

        let err = engine.synthesize(TtsRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, TtsEngineError::ModelUnavailable(ref m) if m == "weights not found"));
        let events = engine
            .synthesize_stream(TtsRequest::new("hi"))
            .unwrap()
            .collect()
            .await;
        assert_eq!(events, vec![StreamEvent::Failed("weights not found".into())]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn preload_builds_model_and_default_voice() {
        let (engine, calls) = engine(0, None);
        engine.preload().await.unwrap();
        assert!(engine.is_loaded());
        assert_eq!(calls.state_builds.load(Ordering::SeqCst), 1);

        engine.synthesize(TtsRequest::new("hi")).await.unwrap();
        assert_eq!(calls.loads.load(Ordering::SeqCst), 1);
        assert_eq!(calls.state_builds.load(Ordering::SeqCst), 1);
    }
}
