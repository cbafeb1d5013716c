use std::sync::Arc;

use anyhow::Result;
use backend::{cli::ServerArgs, config::ServerConfig, server};
use clap::Parser;
use tracing::info;
use tts_engine::python::{ensure_python_path, PyQwenEngine, QwenLoadOptions};

#[derive(Debug, Parser)]
#[command(author, version, about = "Local Qwen3-TTS server")]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
    /// HuggingFace model id or local checkpoint path
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    server::init_tracing(&args.server.log_level)?;

    let mut config = ServerConfig::from_args(&args.server, "QWEN_TTS")?;
    if let Some(model) = args.model {
        config.qwen.model = model;
    }
    for path in &config.python_paths {
        ensure_python_path(path)?;
    }
    info!(
        target = "local_tts::server",
        host = %config.host,
        port = config.port,
        model = %config.qwen.model,
        preload = config.preload,
        "starting Qwen3-TTS server"
    );

    let options = QwenLoadOptions {
        device: config.qwen.device.clone(),
        cpu_threads: config.qwen.cpu_threads,
    };
    let engine = PyQwenEngine::from_python(&config.qwen.model, options, config.stream_buffer);
    server::run(Arc::new(engine), &config).await
}
