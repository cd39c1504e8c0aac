//! HTTP server implementation
//!
//! Implements:
//! - Identity middleware (resolves every request to an effective identity,
//!   issues/clears credential cookies)
//! - Visitor API (GET /v1/me, POST /v1/resources with quota gating)
//! - Registration flow (POST /v1/register with migration of prior activity)
//! - Session teardown (POST /v1/logout)
//! - Health endpoint (GET /health)
//!
//! The routing here is deliberately thin: it wires the identity, quota, and
//! migration components to the wire formats and nothing else.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::identity::{Identity, IdentityConfig, IdentityResolver, RequestCredentials};
use crate::migration::MigrationEngine;
use crate::quota::{QuotaConfig, QuotaEnforcer};
use crate::resources::{ResourceRecord, ResourceStore};
use crate::sessions::{RegisteredSession, SessionStore, SessionStoreError, User};

/// Default bind host
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8760;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// The `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Build a `ServerConfig` from the top-level configuration value.
///
/// Reads `server.bind` and `server.port`, falling back to defaults when
/// keys are absent.
pub fn build_server_config(cfg: &Value) -> ServerConfig {
    let server = cfg.get("server").and_then(|v| v.as_object());
    let defaults = ServerConfig::default();

    ServerConfig {
        bind: server
            .and_then(|o| o.get("bind"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or(defaults.bind),
        port: server
            .and_then(|o| o.get("port"))
            .and_then(|v| v.as_u64())
            .map(|p| p as u16)
            .unwrap_or(defaults.port),
    }
}

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub resolver: Arc<IdentityResolver>,
    pub quota: Arc<QuotaEnforcer>,
    pub migration: Arc<MigrationEngine>,
    pub identity_config: Arc<IdentityConfig>,
    pub quota_config: QuotaConfig,
}

impl AppState {
    /// Wire the subsystem components over shared stores.
    pub fn new(
        sessions: Arc<SessionStore>,
        resources: Arc<dyn ResourceStore>,
        identity_config: IdentityConfig,
        quota_config: QuotaConfig,
    ) -> Self {
        Self {
            resolver: Arc::new(IdentityResolver::new(sessions.clone())),
            quota: Arc::new(QuotaEnforcer::new(sessions.clone(), resources.clone())),
            migration: Arc::new(MigrationEngine::new(sessions.clone(), resources.clone())),
            sessions,
            resources,
            identity_config: Arc::new(identity_config),
            quota_config,
        }
    }
}

/// Build the application router with identity middleware applied to the
/// visitor API. `/health` stays outside the middleware so probes never mint
/// sessions.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/me", get(me))
        .route("/v1/resources", post(create_resource))
        .route("/v1/register", post(register))
        .route("/v1/logout", post(logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .with_state(state);

    let health = Router::new().route("/health", get(health));

    api.merge(health)
}

/// Bind and serve until the shutdown channel fires.
pub async fn serve(
    state: AppState,
    bind_address: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(address = %listener.local_addr()?, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        // Wait until the shutdown channel is set to true
        loop {
            if *shutdown.borrow() {
                break;
            }
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    })
    .await
}

/// Resolve the request's identity and stash it as a request extension.
///
/// The resolution's cookie directives are replayed onto the response:
/// a freshly minted anonymous token is set, a dead registered token cleared.
async fn identity_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let creds = RequestCredentials::from_headers(request.headers(), &state.identity_config)
        .with_ip_address(addr.ip().to_string());
    let resolution = state.resolver.resolve(&creds);

    request.extensions_mut().insert(resolution.identity.clone());
    let mut response = next.run(request).await;

    if let Some(token) = &resolution.issued_session {
        append_cookie(
            &mut response,
            &anonymous_cookie(&state.identity_config, token),
        );
    }
    if resolution.clear_registered {
        append_cookie(&mut response, &clear_registered_cookie(&state.identity_config));
    }
    response
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn me(Extension(identity): Extension<Identity>) -> Json<Value> {
    let body = match identity {
        Identity::Registered { user_id } => json!({ "kind": "registered", "userId": user_id }),
        Identity::Anonymous { session_id } => {
            json!({ "kind": "anonymous", "sessionId": session_id })
        }
        Identity::None => json!({ "kind": "none" }),
    };
    Json(body)
}

#[derive(Debug, Deserialize)]
struct CreateResourceRequest {
    #[serde(default)]
    title: Option<String>,
}

async fn create_resource(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateResourceRequest>,
) -> Response {
    match identity {
        // Registered users bypass quota entirely.
        Identity::Registered { user_id } => {
            let mut record = ResourceRecord::for_user(&user_id);
            if let Some(title) = req.title {
                record = record.with_title(title);
            }
            match state.resources.create(record) {
                Ok(created) => (
                    StatusCode::CREATED,
                    Json(json!({ "resourceId": created.resource_id })),
                )
                    .into_response(),
                Err(e) => internal_error(e),
            }
        }

        Identity::Anonymous { session_id } => {
            match state
                .quota
                .has_reached_limit(&session_id, state.quota_config.limit)
            {
                Ok(true) => (
                    StatusCode::FORBIDDEN,
                    Json(json!({
                        "error": "quota_exceeded",
                        "message": "Saved item limit reached; register to keep saving",
                        "limit": state.quota_config.limit,
                    })),
                )
                    .into_response(),
                Ok(false) => {
                    let mut record = ResourceRecord::for_session(&session_id);
                    if let Some(title) = req.title {
                        record = record.with_title(title);
                    }
                    let created = match state.resources.create(record) {
                        Ok(c) => c,
                        Err(e) => return internal_error(e),
                    };
                    match state.quota.increment_on_create(&session_id) {
                        Ok(count) => (
                            StatusCode::CREATED,
                            Json(json!({
                                "resourceId": created.resource_id,
                                "count": count,
                                "limit": state.quota_config.limit,
                            })),
                        )
                            .into_response(),
                        Err(e) => internal_error(e),
                    }
                }
                Err(e) => internal_error(e),
            }
        }

        Identity::None => no_session(),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    email: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let user = match state.sessions.create_user(User::new(req.email)) {
        Ok(u) => u,
        Err(e) => return internal_error(e),
    };
    let session = match state.sessions.create_registered(RegisteredSession::new(
        &user.user_id,
        state.identity_config.registered_ttl_hours,
    )) {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };

    // Migration failure must not block the registration itself.
    let migration = match &identity {
        Identity::Anonymous { session_id } => {
            match state.migration.migrate(session_id, &user.user_id) {
                Ok(outcome) => json!({ "status": "ok", "migrated": outcome.migrated }),
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        user_id = %user.user_id,
                        error = %e,
                        "Could not transfer prior activity"
                    );
                    json!({ "status": "failed" })
                }
            }
        }
        _ => json!({ "status": "skipped", "migrated": 0 }),
    };

    let mut response = (
        StatusCode::CREATED,
        Json(json!({
            "userId": user.user_id,
            "token": session.token,
            "migration": migration,
        })),
    )
        .into_response();
    append_cookie(
        &mut response,
        &registered_cookie(&state.identity_config, &session.token),
    );
    response
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let creds = RequestCredentials::from_headers(&headers, &state.identity_config);
    if let Some(token) = creds.registered_token {
        match state.sessions.delete_registered(&token) {
            // Logging out an already-dead token is fine.
            Ok(()) | Err(SessionStoreError::NotFound(_)) => {}
            Err(e) => return internal_error(e),
        }
    }

    let mut response = Json(json!({ "ok": true })).into_response();
    append_cookie(&mut response, &clear_registered_cookie(&state.identity_config));
    response
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    warn!(error = %err, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal", "message": err.to_string() })),
    )
        .into_response()
}

fn no_session() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "no_session", "message": "No session available" })),
    )
        .into_response()
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// Anonymous tokens must survive browser restarts; the sweeper, not cookie
/// expiry, decides when a visitor identity dies.
const ANONYMOUS_COOKIE_MAX_AGE_SECS: u64 = 365 * 24 * 3600;

fn anonymous_cookie(config: &IdentityConfig, token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ANONYMOUS_COOKIE_MAX_AGE_SECS}",
        config.anonymous_cookie, token
    )
}

fn registered_cookie(config: &IdentityConfig, token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.registered_cookie,
        token,
        u64::from(config.registered_ttl_hours) * 3600
    )
}

fn clear_registered_cookie(config: &IdentityConfig) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        config.registered_cookie
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_server_config_defaults() {
        let cfg = json!({});
        let sc = build_server_config(&cfg);
        assert_eq!(sc, ServerConfig::default());
        assert_eq!(sc.bind_address(), "127.0.0.1:8760");
    }

    #[test]
    fn test_build_server_config_override() {
        let cfg = json!({ "server": { "bind": "0.0.0.0", "port": 9000 } });
        let sc = build_server_config(&cfg);
        assert_eq!(sc.bind, "0.0.0.0");
        assert_eq!(sc.port, 9000);
        assert_eq!(sc.bind_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_cookie_shapes() {
        let config = IdentityConfig::default();

        let anon = anonymous_cookie(&config, "anon_1f_0123456789ab");
        assert!(anon.starts_with("gp_anon=anon_1f_0123456789ab;"));
        assert!(anon.contains("HttpOnly"));

        let reg = registered_cookie(&config, "tok");
        assert!(reg.starts_with("gp_session=tok;"));
        assert!(reg.contains("Max-Age=2592000"));

        let clear = clear_registered_cookie(&config);
        assert!(clear.starts_with("gp_session=;"));
        assert!(clear.contains("Max-Age=0"));
    }
}
