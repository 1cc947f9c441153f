//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Education platform API gateway with degraded-mode authentication
#[derive(Parser, Debug)]
#[command(name = "edu-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "EDU_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "EDU_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "EDU_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Strict mode: never fall back to local authentication
    #[arg(long, env = "EDU_GATEWAY_STRICT")]
    pub strict: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "EDU_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "EDU_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
