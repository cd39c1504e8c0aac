//! Identity resolution.
//!
//! Every inbound request resolves to an effective identity: a registered
//! user, an anonymous session, or no identity at all. Credentials travel as
//! cookies or explicit headers (the latter for non-browser clients). First
//! unauthenticated contact mints and persists a fresh anonymous session; a
//! store failure resolves to no identity rather than fabricating one.

pub mod token;

use axum::http::{header, HeaderMap};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::sessions::{AnonymousSession, SessionStore, SessionStoreError};

/// Default cookie carrying the registered-session token.
pub const DEFAULT_REGISTERED_COOKIE: &str = "gp_session";
/// Default cookie carrying the anonymous-session token.
pub const DEFAULT_ANONYMOUS_COOKIE: &str = "gp_anon";
/// Default header carrying the registered-session token.
pub const DEFAULT_REGISTERED_HEADER: &str = "x-guestpass-session";
/// Default header carrying the anonymous-session token.
pub const DEFAULT_ANONYMOUS_HEADER: &str = "x-guestpass-anon";

/// How many times the resolver retries a colliding freshly-minted token
/// before failing closed.
const MINT_ATTEMPTS: usize = 2;

/// Configuration for credential carriers and registered-session lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Cookie name for the registered-session token.
    pub registered_cookie: String,
    /// Cookie name for the anonymous-session token.
    pub anonymous_cookie: String,
    /// Header name for the registered-session token.
    pub registered_header: String,
    /// Header name for the anonymous-session token.
    pub anonymous_header: String,
    /// Lifetime of a registered session in hours.
    pub registered_ttl_hours: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            registered_cookie: DEFAULT_REGISTERED_COOKIE.to_string(),
            anonymous_cookie: DEFAULT_ANONYMOUS_COOKIE.to_string(),
            registered_header: DEFAULT_REGISTERED_HEADER.to_string(),
            anonymous_header: DEFAULT_ANONYMOUS_HEADER.to_string(),
            registered_ttl_hours: 720,
        }
    }
}

/// Build an `IdentityConfig` from the top-level configuration value.
///
/// Reads `identity.sessionTtlHours`, `identity.cookies.{registered,anonymous}`,
/// and `identity.headers.{registered,anonymous}`, falling back to defaults
/// when keys are absent.
pub fn build_identity_config(cfg: &Value) -> IdentityConfig {
    let identity = cfg.get("identity").and_then(|v| v.as_object());
    let cookies = identity
        .and_then(|o| o.get("cookies"))
        .and_then(|v| v.as_object());
    let headers = identity
        .and_then(|o| o.get("headers"))
        .and_then(|v| v.as_object());

    let defaults = IdentityConfig::default();

    let str_or = |obj: Option<&serde_json::Map<String, Value>>, key: &str, default: &str| {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| default.to_string())
    };

    IdentityConfig {
        registered_cookie: str_or(cookies, "registered", &defaults.registered_cookie),
        anonymous_cookie: str_or(cookies, "anonymous", &defaults.anonymous_cookie),
        registered_header: str_or(headers, "registered", &defaults.registered_header),
        anonymous_header: str_or(headers, "anonymous", &defaults.anonymous_header),
        registered_ttl_hours: identity
            .and_then(|o| o.get("sessionTtlHours"))
            .and_then(|v| v.as_u64())
            .map(|h| h as u32)
            .unwrap_or(defaults.registered_ttl_hours),
    }
}

/// Credentials lifted from one request.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    pub registered_token: Option<String>,
    pub anonymous_token: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl RequestCredentials {
    /// Lift credentials from request headers. Explicit headers take
    /// precedence over cookies.
    pub fn from_headers(headers: &HeaderMap, config: &IdentityConfig) -> Self {
        let cookies = parse_cookies(headers);

        let registered_token = header_value(headers, &config.registered_header)
            .or_else(|| cookies.get(&config.registered_cookie).cloned());
        let anonymous_token = header_value(headers, &config.anonymous_header)
            .or_else(|| cookies.get(&config.anonymous_cookie).cloned());

        Self {
            registered_token,
            anonymous_token,
            user_agent: header_value(headers, "user-agent"),
            ip_address: None,
        }
    }

    /// Attach the client address observed at the transport layer.
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// The effective identity of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// An authenticated account holder.
    Registered { user_id: String },
    /// A pre-registration visitor.
    Anonymous { session_id: String },
    /// No identity could be established (including store failure).
    None,
}

impl Identity {
    /// The anonymous session id, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Identity::Anonymous { session_id } => Some(session_id),
            _ => None,
        }
    }

    /// The registered user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Registered { user_id } => Some(user_id),
            _ => None,
        }
    }
}

/// The outcome of resolving one request's credentials.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identity: Identity,
    /// Freshly minted anonymous token the caller should hand back to the
    /// client (set-cookie or response header).
    pub issued_session: Option<String>,
    /// The presented registered token was expired or unknown and should be
    /// cleared from the client.
    pub clear_registered: bool,
}

impl Resolution {
    fn none() -> Self {
        Self {
            identity: Identity::None,
            issued_session: None,
            clear_registered: false,
        }
    }
}

/// Resolves request credentials against the session store.
#[derive(Debug)]
pub struct IdentityResolver {
    sessions: Arc<SessionStore>,
}

impl IdentityResolver {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// Resolve one request's credentials to an effective identity.
    ///
    /// The resolved identity's activity timestamp is refreshed on every
    /// call; this is what keeps a session alive against the expiry sweeper.
    pub fn resolve(&self, creds: &RequestCredentials) -> Resolution {
        let mut clear_registered = false;

        if let Some(token) = creds.registered_token.as_deref() {
            match self.sessions.get_registered(token) {
                Ok(session) => {
                    if let Err(e) = self.sessions.touch_registered(token) {
                        warn!(error = %e, "Failed to refresh registered session activity");
                    }
                    return Resolution {
                        identity: Identity::Registered {
                            user_id: session.user_id,
                        },
                        issued_session: None,
                        clear_registered: false,
                    };
                }
                Err(SessionStoreError::NotFound(_)) => {
                    debug!("Registered token expired or unknown; clearing credential");
                    clear_registered = true;
                }
                Err(e) => {
                    warn!(error = %e, "Session store unavailable; resolving to no identity");
                    return Resolution::none();
                }
            }
        }

        if let Some(token) = creds.anonymous_token.as_deref() {
            if token::is_valid_session_token(token) {
                match self.sessions.get_anonymous(token) {
                    Ok(_) => {
                        if let Err(e) = self.sessions.touch_anonymous(token) {
                            warn!(error = %e, "Failed to refresh anonymous session activity");
                        }
                        return Resolution {
                            identity: Identity::Anonymous {
                                session_id: token.to_string(),
                            },
                            issued_session: None,
                            clear_registered,
                        };
                    }
                    Err(SessionStoreError::NotFound(_)) => {
                        debug!("Unknown anonymous token; minting a fresh session");
                    }
                    Err(e) => {
                        warn!(error = %e, "Session store unavailable; resolving to no identity");
                        return Resolution::none();
                    }
                }
            } else {
                debug!("Malformed anonymous token ignored");
            }
        }

        self.mint(creds, clear_registered)
    }

    fn mint(&self, creds: &RequestCredentials, clear_registered: bool) -> Resolution {
        for _ in 0..MINT_ATTEMPTS {
            let token = token::mint_session_token();
            let mut session = AnonymousSession::new(&token);
            session.user_agent = creds.user_agent.clone();
            session.ip_address = creds.ip_address.clone();

            match self.sessions.create_anonymous(session) {
                Ok(created) => {
                    debug!(session_id = %created.session_id, "Minted anonymous session");
                    return Resolution {
                        identity: Identity::Anonymous {
                            session_id: created.session_id.clone(),
                        },
                        issued_session: Some(created.session_id),
                        clear_registered,
                    };
                }
                Err(SessionStoreError::AlreadyExists(id)) => {
                    // Existing sessions are never overwritten; retry with a
                    // fresh token.
                    warn!(session_id = %id, "Anonymous token collision; retrying");
                }
                Err(e) => {
                    warn!(error = %e, "Session store unavailable; resolving to no identity");
                    return Resolution::none();
                }
            }
        }

        warn!("Exhausted mint attempts; resolving to no identity");
        Resolution::none()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(raw) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return cookies;
    };
    for pair in raw.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if !name.is_empty() {
                cookies.insert(name.to_string(), value.to_string());
            }
        }
    }
    cookies
}
