//! Configuration management

use std::{collections::BTreeMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Identity microservice configuration
    pub identity: IdentityConfig,
    /// Route table configuration
    pub routes: RoutesConfig,
    /// Canary split for the chat WebSocket route
    pub canary: CanaryConfig,
    /// Generic reverse-proxy configuration
    pub proxy: ProxyConfig,
    /// Threat/rate gate tuning
    pub gate: GateConfig,
}

/// Server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Identity microservice configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Base URL of the user service
    pub base_url: String,
    /// Shared secret signing service credentials and local session tokens
    pub secret_key: String,
    /// Strict mode: the remote identity service is the sole source of truth
    /// and the local fallback tier is never consulted
    pub strict_mode: bool,
    /// Per-call timeout for identity operations (fail fast)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Lifetime of minted service credentials
    #[serde(with = "humantime_serde")]
    pub service_token_ttl: Duration,
    /// Lifetime of locally signed session tokens
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Lifetime of re-authentication proofs
    #[serde(with = "humantime_serde")]
    pub reauth_ttl: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://user-service:8003".to_string(),
            secret_key: String::new(),
            strict_mode: false,
            timeout: Duration::from_secs(10),
            service_token_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(3600),
            reauth_ttl: Duration::from_secs(300),
        }
    }
}

/// Route table configuration
///
/// `services` maps a path prefix to a microservice base URL (the prefix is
/// stripped before forwarding). `legacy` is an explicit allowlist of prefixes
/// forwarded to the monolith with the full original path preserved. An
/// unregistered path is always a 404, never silently forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// Microservice routes: prefix -> base URL
    pub services: BTreeMap<String, String>,
    /// Legacy monolith base URL
    pub legacy_url: String,
    /// Legacy path allowlist (prefixes)
    pub legacy_allow: Vec<String>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "/api/v1/planning".to_string(),
            "http://planning-agent:8000".to_string(),
        );
        services.insert(
            "/api/v1/memory".to_string(),
            "http://memory-agent:8001".to_string(),
        );
        services.insert(
            "/api/security".to_string(),
            "http://user-service:8003".to_string(),
        );
        Self {
            services,
            legacy_url: "http://core-kernel:8000".to_string(),
            legacy_allow: vec!["/admin".to_string(), "/qa".to_string()],
        }
    }
}

/// Canary split configuration for the chat WebSocket route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Percentage of connections routed to the conversation service (0..=100)
    pub rollout_percent: u8,
    /// New conversation service WebSocket base URL
    pub conversation_url: String,
    /// Legacy orchestrator base URL
    pub orchestrator_url: String,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            rollout_percent: 0,
            conversation_url: "ws://conversation-service:8010".to_string(),
            orchestrator_url: "http://orchestrator-service:8006".to_string(),
        }
    }
}

/// Reverse-proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Per-request timeout for generic proxying (longer than identity calls)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

/// Threat/rate gate tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Failures per identity before lockout
    pub max_failures: u32,
    /// Lockout window after hitting the failure ceiling
    #[serde(with = "humantime_serde")]
    pub lockout: Duration,
    /// Burst ceiling for attempts per identity per minute
    pub attempts_per_minute: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lockout: Duration::from_secs(300),
            attempts_per_minute: 30,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails startup validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (EDU_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("EDU_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate startup invariants. Malformed tables and missing secrets are
    /// fatal here, not per-request.
    pub fn validate(&self) -> Result<()> {
        if self.identity.secret_key.is_empty() {
            return Err(Error::Config(
                "identity.secret_key must be set (EDU_GATEWAY_IDENTITY__SECRET_KEY)".to_string(),
            ));
        }
        if self.canary.rollout_percent > 100 {
            return Err(Error::Config(format!(
                "canary.rollout_percent must be 0..=100, got {}",
                self.canary.rollout_percent
            )));
        }
        for (prefix, target) in &self.routes.services {
            if !prefix.starts_with('/') {
                return Err(Error::Config(format!(
                    "route prefix must start with '/': {prefix}"
                )));
            }
            Url::parse(target)
                .map_err(|e| Error::Config(format!("invalid target URL {target}: {e}")))?;
        }
        for prefix in &self.routes.legacy_allow {
            if !prefix.starts_with('/') {
                return Err(Error::Config(format!(
                    "legacy allowlist prefix must start with '/': {prefix}"
                )));
            }
        }
        Url::parse(&self.identity.base_url)
            .map_err(|e| Error::Config(format!("invalid identity.base_url: {e}")))?;
        Url::parse(&self.routes.legacy_url)
            .map_err(|e| Error::Config(format!("invalid routes.legacy_url: {e}")))?;
        Ok(())
    }
}
