use std::path::PathBuf;

use clap::Args;

/// Flags shared by both server binaries.
#[derive(Clone, Debug, Default, Args)]
pub struct ServerArgs {
    /// Host to bind to [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<String>,
    /// Port to bind to [default: 5123]
    #[arg(long)]
    pub port: Option<u16>,
    /// Load the model (and default voice) before accepting requests
    #[arg(long, default_value_t = false)]
    pub preload: bool,
    /// Optional TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Logging level (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
