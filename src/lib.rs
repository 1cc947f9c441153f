//! Education Platform API Gateway
//!
//! Routes inbound traffic for an education chat platform that is migrating
//! from a monolith to microservices:
//!
//! - **Route dispatch**: prefix-matched forwarding to registered
//!   microservices, an explicit legacy-monolith allowlist, or 404
//! - **Degraded-mode authentication**: identity operations go to the user
//!   microservice first and fall back to a local tier when (and only when)
//!   the remote side is unreachable
//! - **Endpoint probing**: alternate identity paths are probed in priority
//!   order and the first working one is memoized per operation
//! - **Canary WebSocket routing**: percentage-based split for the chat
//!   stream between the new conversation service and the legacy orchestrator

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
