//! Education Platform API Gateway
//!
//! Resilient request routing with degraded-mode authentication for a
//! monolith-to-microservices migration.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use edu_gateway::{cli::Cli, config::Config, gateway::Gateway, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            if cli.strict {
                config.identity.strict_mode = true;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        strict_mode = config.identity.strict_mode,
        "Starting education gateway"
    );

    if let Err(e) = Gateway::new(config).run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
