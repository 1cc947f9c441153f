//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::to_bytes,
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    http::{HeaderMap, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::canary::{CanarySplit, Cohort};
use super::proxy::HttpProxy;
use super::pump;
use super::routes::{Decision, ROUTE_NOT_FOUND_DETAIL, RouteTable};
use crate::auth::AuthOrchestrator;
use crate::{Error, Result};

/// Largest request body the gateway will buffer for proxying
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Header carrying a previously issued re-authentication proof
const REAUTH_TOKEN_HEADER: &str = "x-reauth-token";
/// Header carrying a password for inline re-verification
const REAUTH_PASSWORD_HEADER: &str = "x-reauth-password";

/// Shared application state
pub struct AppState {
    /// Two-tier authentication orchestrator
    pub orchestrator: Arc<AuthOrchestrator>,
    /// Immutable route table
    pub routes: Arc<RouteTable>,
    /// Canary split for the chat WebSocket
    pub canary: Arc<CanarySplit>,
    /// Generic reverse proxy
    pub proxy: Arc<HttpProxy>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/reauth", post(reauth_handler))
        .route("/users/me", get(me_handler))
        .route("/users/me/change-password", post(change_password_handler))
        .route("/api/chat/ws", get(chat_ws_handler))
        .fallback(dispatch_handler)
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "edu-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    full_name: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ReauthRequest {
    password: String,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::LocalAuth("Not authenticated".to_string()))
}

/// Caller IP as reported by the edge, first hop of X-Forwarded-For.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Re-authentication material for privileged routes: an issued proof, a
/// password for inline re-verification, or neither.
fn reauth_material(headers: &HeaderMap) -> (Option<&str>, Option<&str>) {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };
    (value(REAUTH_TOKEN_HEADER), value(REAUTH_PASSWORD_HEADER))
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// POST /auth/register
async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let ctx = state
        .orchestrator
        .context(&body.email)
        .with_client(client_ip(&headers), user_agent(&headers));
    let user = state
        .orchestrator
        .register(&body.full_name, &body.email, &body.password, &ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/login
async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let ctx = state
        .orchestrator
        .context(&body.email)
        .with_client(client_ip(&headers), user_agent(&headers));
    let outcome = state
        .orchestrator
        .authenticate(&body.email, &body.password, &ctx)
        .await?;
    Ok(Json(json!({
        "access_token": outcome.tokens.access_token,
        "refresh_token": outcome.tokens.refresh_token,
        "token_type": outcome.tokens.token_type,
        "user": outcome.user,
    })))
}

/// POST /auth/reauth - re-verify the password and mint a short-lived proof
/// for privileged operations.
async fn reauth_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ReauthRequest>,
) -> Result<impl IntoResponse> {
    let token = bearer_token(&headers)?;
    let user = state.orchestrator.current_user(token).await?;
    let ctx = state
        .orchestrator
        .context(&user.email)
        .with_client(client_ip(&headers), user_agent(&headers));
    let proof = state
        .orchestrator
        .issue_reauth_proof(&user, &body.password, &ctx)
        .await?;
    Ok(Json(json!({ "reauth_token": proof })))
}

/// GET /users/me
async fn me_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let token = bearer_token(&headers)?;
    let user = state.orchestrator.current_user(token).await?;
    Ok(Json(user))
}

/// POST /users/me/change-password
///
/// Privileged: demands re-authentication via `X-Reauth-Token` (an issued
/// proof) or `X-Reauth-Password` on top of the session token.
async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse> {
    let token = bearer_token(&headers)?;
    let user = state.orchestrator.current_user(token).await?;
    let ctx = state
        .orchestrator
        .context(&user.email)
        .with_client(client_ip(&headers), user_agent(&headers));
    let (proof, password) = reauth_material(&headers);
    state
        .orchestrator
        .enforce_reauth(&user, proof, password, &ctx)
        .await?;
    state
        .orchestrator
        .change_password(token, &body.current_password, &body.new_password)
        .await?;
    Ok(Json(json!({ "message": "Password updated successfully" })))
}

/// GET /api/chat/ws - canary-split WebSocket tunnel
async fn chat_ws_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let choice = state.canary.decide();
    info!(
        cohort = ?choice.cohort,
        target = %choice.target,
        rollout_percent = state.canary.rollout_percent(),
        "Chat WebSocket connection"
    );

    // Forwarded verbatim: re-encoding would lose parameter order, duplicate
    // keys, and percent escapes
    let url = pump::build_ws_url(&choice.target, "/api/chat/ws", uri.query());
    let protocols = pump::offered_protocols(&headers);

    // The upstream leg is established before the client is accepted so a
    // dead upstream yields an explicit close, not a silent tunnel.
    match pump::connect_upstream(&url, &headers, &protocols).await {
        Ok((upstream, accepted)) => {
            let ws = match accepted {
                Some(protocol) => ws.protocols([protocol]),
                None => ws,
            };
            ws.on_upgrade(move |client: WebSocket| pump::pump(client, upstream))
        }
        Err(error) => {
            let cohort_name = match choice.cohort {
                Cohort::Conversation => "conversation",
                Cohort::Orchestrator => "orchestrator",
            };
            warn!(target = %url, cohort = cohort_name, error = %error, "Upstream WebSocket connect failed");
            ws.on_upgrade(pump::close_unavailable)
        }
    }
}

/// Fallback: dispatch everything else through the route table.
async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    match state.routes.decide(&path) {
        Decision::Forward { target, path: forwarded } => {
            let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Error::Invalid("Request body too large".to_string()).into_response();
                }
            };
            let url = format!("{target}{forwarded}");
            match state
                .proxy
                .forward(parts.method, &url, parts.uri.query(), &parts.headers, bytes)
                .await
            {
                Ok(response) => response,
                Err(error) => error.into_response(),
            }
        }
        Decision::NotFound => {
            warn!(path = %path, "No route for path");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": ROUTE_NOT_FOUND_DETAIL, "path": path })),
            )
                .into_response()
        }
    }
}
