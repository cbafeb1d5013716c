use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config as config_rs;
use serde::Deserialize;
use tts_engine::{qwen::DEFAULT_QWEN_MODEL, relay::DEFAULT_STREAM_BUFFER};

use crate::cli::ServerArgs;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub preload: bool,
    /// Capacity of the channel between a streaming producer and the response.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Extra entries for the interpreter's `sys.path`, e.g. a venv's site-packages.
    #[serde(default)]
    pub python_paths: Vec<PathBuf>,
    #[serde(default)]
    pub qwen: QwenConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QwenConfig {
    #[serde(default = "default_qwen_model")]
    pub model: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_cpu_threads")]
    pub cpu_threads: usize,
}

impl Default for QwenConfig {
    fn default() -> Self {
        Self {
            model: default_qwen_model(),
            device: None,
            cpu_threads: default_cpu_threads(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            preload: false,
            stream_buffer: default_stream_buffer(),
            python_paths: Vec::new(),
            qwen: QwenConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5123
}

fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

fn default_qwen_model() -> String {
    DEFAULT_QWEN_MODEL.to_string()
}

fn default_cpu_threads() -> usize {
    8
}

impl ServerConfig {
    /// Defaults, then the optional file, then `<PREFIX>__*` environment variables.
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = config_rs::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config_rs::File::from(path.to_path_buf()));
        }
        builder = builder.add_source(config_rs::Environment::with_prefix(env_prefix).separator("__"));

        let cfg = builder.build().with_context(|| match path {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "failed to load configuration".to_string(),
        })?;

        let mut server: ServerConfig = cfg
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        if let Some(base) = path.and_then(Path::parent) {
            server.rebase_paths(base);
        }
        Ok(server)
    }

    /// Loads layered configuration and lets explicit CLI flags win.
    pub fn from_args(args: &ServerArgs, env_prefix: &str) -> Result<Self> {
        let mut server = Self::load(args.config.as_deref(), env_prefix)?;
        server.apply_overrides(args);
        Ok(server)
    }

    pub fn apply_overrides(&mut self, args: &ServerArgs) {
        if let Some(ref host) = args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        self.preload |= args.preload;
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn rebase_paths(&mut self, base: &Path) {
        for path in &mut self.python_paths {
            *path = absolute_path(base, path);
        }
    }
}

fn absolute_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
