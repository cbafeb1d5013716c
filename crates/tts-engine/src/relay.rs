use std::ops::ControlFlow;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::{sync::mpsc, task};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{audio::Waveform, TtsEngineError};

pub const DEFAULT_STREAM_BUFFER: usize = 8;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AudioChunk {
    pub audio_base64: String,
    pub sample_rate: u32,
    pub duration: f64,
    pub done: bool,
}

/// One message on the streaming channel. `Finished` and `Failed` are
/// terminal; a `Chunk` is terminal only when it carries `done: true`.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Chunk(AudioChunk),
    Finished,
    Failed(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Chunk(chunk) => chunk.done,
            StreamEvent::Finished | StreamEvent::Failed(_) => true,
        }
    }

    /// JSON body of the SSE `data:` frame.
    pub fn payload(&self) -> JsonValue {
        match self {
            StreamEvent::Chunk(chunk) => json!(chunk),
            StreamEvent::Finished => json!({ "done": true }),
            StreamEvent::Failed(message) => json!({ "error": message }),
        }
    }
}

/// How a producer ended, deciding whether the relay appends `Finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    AppendDone,
    AlreadyDone,
}

pub struct ChunkSender {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChunkSender {
    /// Encodes and queues one chunk. `Break` means the consumer went away.
    pub fn send_waveform(
        &self,
        waveform: &Waveform,
        done: bool,
    ) -> Result<ControlFlow<()>, TtsEngineError> {
        let audio_base64 = waveform
            .to_base64_wav()
            .map_err(TtsEngineError::synthesis)?;
        let chunk = AudioChunk {
            audio_base64,
            sample_rate: waveform.sample_rate,
            duration: waveform.duration(),
            done,
        };
        Ok(self.send(StreamEvent::Chunk(chunk)))
    }

    fn send(&self, event: StreamEvent) -> ControlFlow<()> {
        match self.tx.blocking_send(event) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => {
                debug!(target = "local_tts::relay", "stream consumer disconnected");
                ControlFlow::Break(())
            }
        }
    }
}

pub struct StreamHandle {
    rx: mpsc::Receiver<StreamEvent>,
}

impl StreamHandle {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<StreamEvent> {
        ReceiverStream::new(self.rx)
    }

    /// Drains the channel until the producer hangs up.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// Runs `produce` on a blocking worker and relays what it sends over a
/// bounded channel. Must be called from within a Tokio runtime.
pub fn spawn_producer<F>(capacity: usize, produce: F) -> StreamHandle
where
    F: FnOnce(&ChunkSender) -> Result<StreamEnd, TtsEngineError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    task::spawn_blocking(move || {
        let sink = ChunkSender { tx };
        let terminal = match produce(&sink) {
            Ok(StreamEnd::AppendDone) => Some(StreamEvent::Finished),
            Ok(StreamEnd::AlreadyDone) => None,
            Err(err) => {
                warn!(target = "local_tts::relay", error = %err, "stream aborted");
                Some(StreamEvent::Failed(err.to_string()))
            }
        };
        if let Some(event) = terminal {
            let _ = sink.send(event);
        }
    });
    StreamHandle { rx }
}
