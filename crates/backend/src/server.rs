use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::{anyhow, Context, Result};
use tokio::signal;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use tts_engine::TtsEngine;

use crate::{
    config::ServerConfig,
    routes::{build_router, ApiState},
};

/// Installs the global subscriber. `level` accepts a bare level or a full filter directive.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow!("failed to initialise tracing subscriber: {err}"))?;
    Ok(())
}

pub async fn run(engine: Arc<dyn TtsEngine>, config: &ServerConfig) -> Result<()> {
    let kind = engine.kind();

    if config.preload {
        info!(target = "local_tts::server", engine = %kind, "preloading model");
        let started = Instant::now();
        engine
            .preload()
            .await
            .with_context(|| format!("failed to preload {} model", kind.log_label()))?;
        info!(
            target = "local_tts::server",
            engine = %kind,
            elapsed_ms = started.elapsed().as_millis(),
            "model ready"
        );
    } else {
        info!(
            target = "local_tts::server",
            engine = %kind,
            "model will load on first request"
        );
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::WARN));

    let app = build_router(ApiState::new(engine)).layer(trace_layer);

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    let addr: SocketAddr = listener
        .local_addr()
        .context("listener has no local address")?;

    info!(
        target = "local_tts::server",
        %addr,
        "{} server listening on http://{addr}",
        kind.log_label()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(target = "local_tts::server", "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target = "local_tts::server", error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(target = "local_tts::server", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "local_tts::server", "shutdown signal received");
}
