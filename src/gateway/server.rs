//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::canary::CanarySplit;
use super::proxy::HttpProxy;
use super::router::{AppState, create_router};
use super::routes::RouteTable;
use crate::auth::{AuthCrypto, AuthOrchestrator, MemoryUserStore, SlidingGate};
use crate::config::Config;
use crate::identity::IdentityClient;
use crate::identity::credential::ServiceCredential;
use crate::identity::transport::ReqwestTransport;
use crate::{Error, Result};

/// Education gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
}

impl Gateway {
    /// Create a new gateway
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Wire up the shared application state.
    fn build_state(&self) -> Arc<AppState> {
        let identity = &self.config.identity;
        let client = Arc::new(IdentityClient::new(
            &identity.base_url,
            Arc::new(ReqwestTransport::new(identity.timeout)),
            ServiceCredential::new(&identity.secret_key, identity.service_token_ttl),
        ));
        let orchestrator = Arc::new(AuthOrchestrator::new(
            client,
            Arc::new(MemoryUserStore::new()),
            Arc::new(SlidingGate::new(&self.config.gate)),
            AuthCrypto::new(
                &identity.secret_key,
                identity.session_ttl,
                identity.reauth_ttl,
            ),
            identity.strict_mode,
        ));

        Arc::new(AppState {
            orchestrator,
            routes: Arc::new(RouteTable::from_config(&self.config.routes)),
            canary: Arc::new(CanarySplit::from_config(&self.config.canary)),
            proxy: Arc::new(HttpProxy::new(self.config.proxy.timeout)),
        })
    }

    /// Run the gateway until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = self.build_state();
        let app = create_router(Arc::clone(&state));

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("EDU GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(
            identity_url = %self.config.identity.base_url,
            strict_mode = self.config.identity.strict_mode,
            "Identity tier"
        );
        if self.config.identity.strict_mode {
            info!("STRICT MODE: local fallback authentication disabled");
        } else {
            warn!("Degraded-mode fallback enabled: identity outages fall back to local auth");
        }
        info!(routes = state.routes.len(), "Route table built");
        info!(
            rollout_percent = state.canary.rollout_percent(),
            "Chat canary split"
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
