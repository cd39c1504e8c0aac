//! Quota enforcement for anonymous sessions.
//!
//! Anonymous sessions may own a bounded number of resources before
//! registration is required. The stored counter is a cache: every increment
//! recounts the rows that actually reference the session and writes the true
//! value back, so external drift heals on the next write instead of
//! requiring an atomic counter. Registered users are never routed through
//! this module.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::resources::{ResourceStore, ResourceStoreError};
use crate::sessions::{SessionStore, SessionStoreError};

/// Product default for the per-session resource limit.
pub const DEFAULT_RESOURCE_LIMIT: u64 = 3;

/// Error types for quota operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuotaError {
    /// The session the caller holds does not exist in the store. This is a
    /// consistency error between resolver and enforcer, not a user error.
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<ResourceStoreError> for QuotaError {
    fn from(err: ResourceStoreError) -> Self {
        QuotaError::Store(err.to_string())
    }
}

fn map_session_err(err: SessionStoreError) -> QuotaError {
    match err {
        SessionStoreError::NotFound(id) => QuotaError::SessionNotFound(id),
        other => QuotaError::Store(other.to_string()),
    }
}

/// Quota configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Resources an anonymous session may own before registration.
    pub limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RESOURCE_LIMIT,
        }
    }
}

/// Build a `QuotaConfig` from the top-level configuration value.
///
/// Reads `quota.limit`, falling back to the product default when absent.
pub fn build_quota_config(cfg: &Value) -> QuotaConfig {
    let limit = cfg
        .get("quota")
        .and_then(|v| v.get("limit"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_RESOURCE_LIMIT);
    QuotaConfig { limit }
}

/// Enforces the per-session resource quota.
pub struct QuotaEnforcer {
    sessions: Arc<SessionStore>,
    resources: Arc<dyn ResourceStore>,
}

impl QuotaEnforcer {
    pub fn new(sessions: Arc<SessionStore>, resources: Arc<dyn ResourceStore>) -> Self {
        Self {
            sessions,
            resources,
        }
    }

    /// Whether the session is at or past `limit`. Reaching the limit is a
    /// normal outcome, not an error.
    pub fn has_reached_limit(&self, session_id: &str, limit: u64) -> Result<bool, QuotaError> {
        let session = self
            .sessions
            .get_anonymous(session_id)
            .map_err(map_session_err)?;
        Ok(session.resource_count >= limit)
    }

    /// Converge the session's counter after a resource was created and
    /// attributed to it.
    ///
    /// Rather than adding one to the stored value, this recounts the
    /// resources that reference the session and stores that. Two concurrent
    /// increments may both observe the same count, so the value is exact
    /// only once writes settle; that convergence is the accepted tradeoff.
    pub fn increment_on_create(&self, session_id: &str) -> Result<u64, QuotaError> {
        // Surface a missing session before touching the catalog.
        self.sessions
            .get_anonymous(session_id)
            .map_err(map_session_err)?;

        let true_count = self.resources.count_owned_by_session(session_id)?;
        self.sessions
            .set_resource_count(session_id, true_count)
            .map_err(map_session_err)?;

        debug!(session_id, count = true_count, "Converged resource counter");
        Ok(true_count)
    }
}
