use std::sync::Arc;

use anyhow::Result;
use backend::{cli::ServerArgs, config::ServerConfig, server};
use clap::Parser;
use tracing::info;
use tts_engine::python::{ensure_python_path, PyPocketEngine};

#[derive(Debug, Parser)]
#[command(author, version, about = "Local Pocket TTS server")]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    server::init_tracing(&args.server.log_level)?;

    let config = ServerConfig::from_args(&args.server, "POCKET_TTS")?;
    for path in &config.python_paths {
        ensure_python_path(path)?;
    }
    info!(
        target = "local_tts::server",
        host = %config.host,
        port = config.port,
        preload = config.preload,
        "starting Pocket-TTS server"
    );

    let engine = PyPocketEngine::from_python(config.stream_buffer);
    server::run(Arc::new(engine), &config).await
}
