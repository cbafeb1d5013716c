use std::{collections::HashMap, sync::Arc, time::Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::{EngineKind, TtsEngineError};

/// Process-wide model slot. The first caller builds the model while holding
/// `init_lock`; everyone else reads the cell without locking.
pub struct LazyModel<M> {
    kind: EngineKind,
    cell: OnceCell<Arc<M>>,
    init_lock: Mutex<()>,
}

impl<M> LazyModel<M> {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            cell: OnceCell::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<Arc<M>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Returns the shared model, building it on first use. A failed build
    /// leaves the slot empty so the next request attempts it again.
    pub fn get_or_load<F>(&self, build: F) -> Result<Arc<M>, TtsEngineError>
    where
        F: FnOnce() -> anyhow::Result<M>,
    {
        if let Some(model) = self.cell.get() {
            return Ok(model.clone());
        }

        let _guard = self.init_lock.lock();
        if let Some(model) = self.cell.get() {
            return Ok(model.clone());
        }

        info!(
            target = "local_tts::loader",
            engine = %self.kind.log_label(),
            "loading model"
        );
        let started = Instant::now();
        let model = build().map_err(|err| {
            let message = format!("{err:#}");
            error!(
                target = "local_tts::loader",
                engine = %self.kind.log_label(),
                error = %message,
                "model load failed"
            );
            TtsEngineError::unavailable(err)
        })?;
        let model = Arc::new(model);
        // Only this thread can set the cell while init_lock is held.
        let _ = self.cell.set(model.clone());
        info!(
            target = "local_tts::loader",
            engine = %self.kind.log_label(),
            elapsed_ms = started.elapsed().as_millis(),
            "model loaded"
        );
        Ok(model)
    }
}

/// Per-voice derived state, built at most once per voice for the process.
pub struct VoiceStateCache<S> {
    states: RwLock<HashMap<String, Arc<S>>>,
    init_lock: Mutex<()>,
}

impl<S> Default for VoiceStateCache<S> {
    fn default() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            init_lock: Mutex::new(()),
        }
    }
}

impl<S> VoiceStateCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, voice_id: &str) -> Option<Arc<S>> {
        self.states.read().get(voice_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_insert_with<F>(&self, voice_id: &str, build: F) -> Result<Arc<S>, TtsEngineError>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        if let Some(state) = self.get(voice_id) {
            return Ok(state);
        }

        let _guard = self.init_lock.lock();
        if let Some(state) = self.get(voice_id) {
            return Ok(state);
        }

        info!(target = "local_tts::voices", voice = %voice_id, "loading voice state");
        let started = Instant::now();
        let state = Arc::new(build().map_err(TtsEngineError::unavailable)?);
        self.states
            .write()
            .insert(voice_id.to_string(), state.clone());
        info!(
            target = "local_tts::voices",
            voice = %voice_id,
            elapsed_ms = started.elapsed().as_millis(),
            "voice state loaded"
        );
        Ok(state)
    }
}
