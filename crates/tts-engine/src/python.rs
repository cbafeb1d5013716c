//! Embedded-interpreter bridges to the `pocket_tts` and `qwen_tts` packages.

use std::{collections::HashSet, path::Path};

use anyhow::{anyhow, Context, Result};
use numpy::{PyArray1, PyArray2, PyArrayMethods};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pyo3::{
    prelude::*,
    types::{PyDict, PyList},
};
use tracing::{info, warn};

use crate::{
    pocket::{ChunkCallback, PocketEngine, PocketModel},
    qwen::{CustomVoiceRequest, QwenEngine, QwenModel},
    Waveform,
};

pub type PyPocketEngine = PocketEngine<PyPocketModel>;
pub type PyQwenEngine = QwenEngine<PyQwenModel>;

static SYS_PATH_ENTRIES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Prepends `path` (typically a virtualenv's site-packages) to `sys.path`.
pub fn ensure_python_path(path: &Path) -> Result<()> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("python path {} not found", path.display()))?;
    let entry = canonical.to_string_lossy().into_owned();

    let mut entries = SYS_PATH_ENTRIES.lock();
    if entries.contains(&entry) {
        return Ok(());
    }

    Python::with_gil(|py| -> Result<()> {
        let sys_path = py.import_bound("sys")?.getattr("path")?;
        let sys_path = sys_path
            .downcast::<PyList>()
            .map_err(|err| anyhow!("sys.path is not a list: {err}"))?;
        if !sys_path.contains(entry.as_str())? {
            sys_path.insert(0, entry.as_str())?;
        }
        Ok(())
    })?;

    info!(target = "local_tts::python", path = %entry, "added to sys.path");
    entries.insert(entry);
    Ok(())
}

/// Pulls mono f32 samples out of whatever the model handed back: a torch
/// tensor, a numpy array of common dtypes, or a list whose first item is one.
pub fn extract_waveform(value: &Bound<'_, PyAny>) -> Result<Vec<f32>> {
    if let Ok(list) = value.downcast::<PyList>() {
        let first = list
            .get_item(0)
            .context("model returned an empty waveform list")?;
        return extract_waveform(&first);
    }

    if value.hasattr("detach")? {
        let array = value
            .call_method0("detach")?
            .call_method0("cpu")?
            .call_method0("float")?
            .call_method0("numpy")?;
        return extract_waveform(&array);
    }

    if let Ok(array) = value.downcast::<PyArray1<f32>>() {
        return Ok(array.readonly().as_array().iter().copied().collect());
    }

    if let Ok(array) = value.downcast::<PyArray1<f64>>() {
        return Ok(array
            .readonly()
            .as_array()
            .iter()
            .map(|&sample| sample as f32)
            .collect());
    }

    if let Ok(array) = value.downcast::<PyArray1<i16>>() {
        return Ok(array
            .readonly()
            .as_array()
            .iter()
            .map(|&sample| sample as f32 / i16::MAX as f32)
            .collect());
    }

    if let Ok(array) = value.downcast::<PyArray2<f32>>() {
        return Ok(array.readonly().as_array().iter().copied().collect());
    }

    if let Ok(array) = value.downcast::<PyArray2<f64>>() {
        return Ok(array
            .readonly()
            .as_array()
            .iter()
            .map(|&sample| sample as f32)
            .collect());
    }

    Err(anyhow!(
        "unsupported waveform type returned by model: {}",
        value.get_type()
    ))
}

pub struct PyPocketModel {
    model: Py<PyAny>,
}

impl PyPocketModel {
    pub fn load() -> Result<Self> {
        Python::with_gil(|py| -> Result<Self> {
            let module = py
                .import_bound("pocket_tts")
                .context("failed to import pocket_tts")?;
            let model = module
                .getattr("TTSModel")?
                .call_method0("load_model")
                .context("TTSModel.load_model failed")?;
            Ok(Self {
                model: model.unbind(),
            })
        })
    }
}

impl PocketModel for PyPocketModel {
    type VoiceState = Py<PyAny>;

    fn voice_state_for_prompt(&self, prompt: &str) -> Result<Py<PyAny>> {
        Python::with_gil(|py| -> Result<Py<PyAny>> {
            let state = self
                .model
                .bind(py)
                .call_method1("get_state_for_audio_prompt", (prompt,))?;
            Ok(state.unbind())
        })
    }

    fn generate_audio(&self, state: &Py<PyAny>, text: &str) -> Result<Vec<f32>> {
        Python::with_gil(|py| -> Result<Vec<f32>> {
            let audio = self
                .model
                .bind(py)
                .call_method1("generate_audio", (state.bind(py), text))?;
            extract_waveform(&audio)
        })
    }

    fn generate_audio_stream(
        &self,
        state: &Py<PyAny>,
        text: &str,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<()> {
        Python::with_gil(|py| -> Result<()> {
            let chunks = self
                .model
                .bind(py)
                .call_method1("generate_audio_stream", (state.bind(py), text))?;
            for chunk in chunks.iter()? {
                let samples = extract_waveform(&chunk?)?;
                // Release the GIL while the callback waits on a full channel.
                if py.allow_threads(|| on_chunk(samples)).is_break() {
                    break;
                }
            }
            Ok(())
        })
    }
}

#[derive(Clone, Debug)]
pub struct QwenLoadOptions {
    /// `cuda`, `mps` or `cpu`; detected through torch when unset.
    pub device: Option<String>,
    /// Thread count handed to torch when running on the CPU.
    pub cpu_threads: usize,
}

impl Default for QwenLoadOptions {
    fn default() -> Self {
        Self {
            device: None,
            cpu_threads: 8,
        }
    }
}

pub struct PyQwenModel {
    model: Py<PyAny>,
}

impl PyQwenModel {
    pub fn load(model_name: &str, options: &QwenLoadOptions) -> Result<Self> {
        Python::with_gil(|py| -> Result<Self> {
            let torch = py.import_bound("torch").context("failed to import torch")?;
            let device = match options.device.as_deref() {
                Some(device) => device.to_string(),
                None => detect_device(&torch)?,
            };
            let dtype = if device.starts_with("cuda") {
                torch.getattr("bfloat16")?
            } else {
                torch.getattr("float32")?
            };
            if device == "cpu" && options.cpu_threads > 0 {
                torch.call_method1("set_num_threads", (options.cpu_threads,))?;
            }
            info!(
                target = "local_tts::python",
                device = %device,
                dtype = %dtype,
                "selected torch device"
            );

            let cls = py
                .import_bound("qwen_tts")
                .context("failed to import qwen_tts")?
                .getattr("Qwen3TTSModel")?;
            let kwargs = PyDict::new_bound(py);
            kwargs.set_item("device_map", device.as_str())?;
            kwargs.set_item("torch_dtype", &dtype)?;
            kwargs.set_item("local_files_only", true)?;

            // Local cache first, then allow a download.
            let model = match cls.call_method("from_pretrained", (model_name,), Some(&kwargs)) {
                Ok(model) => {
                    info!(target = "local_tts::python", model = %model_name, "loaded from local cache");
                    model
                }
                Err(err) => {
                    warn!(
                        target = "local_tts::python",
                        model = %model_name,
                        error = %err,
                        "local cache miss, allowing download"
                    );
                    kwargs.del_item("local_files_only")?;
                    cls.call_method("from_pretrained", (model_name,), Some(&kwargs))
                        .with_context(|| format!("failed to load {model_name}"))?
                }
            };

            match model
                .call_method0("get_supported_speakers")
                .and_then(|speakers| speakers.extract::<Vec<String>>())
            {
                Ok(speakers) => {
                    info!(target = "local_tts::python", ?speakers, "supported speakers")
                }
                Err(err) => {
                    warn!(target = "local_tts::python", error = %err, "could not list speakers")
                }
            }

            Ok(Self {
                model: model.unbind(),
            })
        })
    }
}

fn detect_device(torch: &Bound<'_, PyModule>) -> Result<String> {
    let cuda = torch
        .getattr("cuda")?
        .call_method0("is_available")?
        .extract::<bool>()?;
    if cuda {
        return Ok("cuda".into());
    }
    // MPS also covers Intel Macs with AMD GPUs.
    let mps = torch
        .getattr("backends")?
        .getattr("mps")?
        .call_method0("is_available")?
        .extract::<bool>()?;
    if mps {
        return Ok("mps".into());
    }
    Ok("cpu".into())
}

impl QwenModel for PyQwenModel {
    fn generate_custom_voice(&self, request: &CustomVoiceRequest<'_>) -> Result<Waveform> {
        Python::with_gil(|py| -> Result<Waveform> {
            let kwargs = PyDict::new_bound(py);
            kwargs.set_item("text", request.text)?;
            kwargs.set_item("speaker", request.speaker.as_str())?;
            kwargs.set_item("language", request.language)?;
            kwargs.set_item("instruct", request.instruct)?;
            kwargs.set_item("do_sample", false)?;

            let result =
                self.model
                    .bind(py)
                    .call_method("generate_custom_voice", (), Some(&kwargs))?;
            let (wavs, sample_rate): (Bound<'_, PyAny>, u32) = result.extract()?;
            anyhow::ensure!(sample_rate > 0, "model reported a zero sample rate");
            let samples = extract_waveform(&wavs)?;
            Ok(Waveform::new(samples, sample_rate))
        })
    }
}

impl PyPocketEngine {
    pub fn from_python(stream_buffer: usize) -> Self {
        PocketEngine::new(PyPocketModel::load, stream_buffer)
    }
}

impl PyQwenEngine {
    pub fn from_python(model_name: &str, options: QwenLoadOptions, stream_buffer: usize) -> Self {
        QwenEngine::new(
            model_name,
            move |name: &str| PyQwenModel::load(name, &options),
            stream_buffer,
        )
    }
}
