//! Session and account store.
//!
//! File-backed storage for anonymous sessions, registered sessions, and user
//! accounts. Each record lives as a JSON file under its own subdirectory
//! (`anon/`, `registered/`, `users/`), fronted by an in-memory cache. Writes
//! go through a temp file and an atomic rename.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use uuid::Uuid;

/// Error types for session store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionStoreError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Identifier already exists: {0}")]
    AlreadyExists(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for SessionStoreError {
    fn from(err: std::io::Error) -> Self {
        SessionStoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SessionStoreError {
    fn from(err: serde_json::Error) -> Self {
        SessionStoreError::Serialization(err.to_string())
    }
}

/// Migration provenance recorded on a retired anonymous session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionProvenance {
    /// User the session's resources were migrated to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_to: Option<String>,
    /// Timestamp of the migration (Unix ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<i64>,
}

/// A pre-registration visitor session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousSession {
    /// Opaque session token, globally unique
    pub session_id: String,
    /// Timestamp when the session was created (Unix ms)
    pub created_at: i64,
    /// Timestamp of last activity (Unix ms); what keeps the session alive
    /// against the expiry sweeper
    pub last_active_at: i64,
    /// Cached count of resources owned by this session. Converged to the
    /// true count on every increment; may transiently run ahead of it.
    pub resource_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Migration provenance, set when the session is retired
    #[serde(default)]
    pub metadata: SessionProvenance,
}

impl AnonymousSession {
    /// Create a new session with the given token.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_active_at: now,
            resource_count: 0,
            user_agent: None,
            ip_address: None,
            metadata: SessionProvenance::default(),
        }
    }

    /// Whether this session has already been migrated to a user.
    pub fn is_migrated(&self) -> bool {
        self.metadata.migrated_to.is_some()
    }
}

/// An authenticated session for a registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredSession {
    /// Opaque bearer token
    pub token: String,
    /// Owning user
    pub user_id: String,
    /// Timestamp when the session was created (Unix ms)
    pub created_at: i64,
    /// Timestamp past which the token is invalid (Unix ms)
    pub expires_at: i64,
    /// Timestamp of last activity (Unix ms)
    pub last_active_at: i64,
}

impl RegisteredSession {
    /// Create a new session for `user_id` valid for `ttl_hours`.
    pub fn new(user_id: impl Into<String>, ttl_hours: u32) -> Self {
        let now = now_millis();
        Self {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user_id.into(),
            created_at: now,
            expires_at: now + i64::from(ttl_hours) * 3_600_000,
            last_active_at: now,
        }
    }

    /// Whether the session is past its expiry at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// A durable account identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: i64,
}

impl User {
    /// Create a new user with a generated identifier.
    pub fn new(email: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            email,
            created_at: now_millis(),
        }
    }
}

/// Thread-safe store for sessions and users with file-based persistence.
#[derive(Debug)]
pub struct SessionStore {
    base_path: PathBuf,
    anonymous: RwLock<HashMap<String, AnonymousSession>>,
    registered: RwLock<HashMap<String, RegisteredSession>>,
    users: RwLock<HashMap<String, User>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a store rooted at the default state directory.
    pub fn new() -> Self {
        let base_path = if let Ok(dir) = std::env::var("GUESTPASS_STATE_DIR") {
            PathBuf::from(dir).join("identity")
        } else {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(".config"))
                .join("guestpass")
                .join("identity")
        };
        Self::with_base_path(base_path)
    }

    /// Create a store rooted at a custom base path.
    pub fn with_base_path(base_path: PathBuf) -> Self {
        Self {
            base_path,
            anonymous: RwLock::new(HashMap::new()),
            registered: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Base path for this store's data.
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn ensure_dirs(&self) -> Result<(), SessionStoreError> {
        for sub in ["anon", "registered", "users"] {
            let dir = self.base_path.join(sub);
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    fn anon_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join("anon").join(format!("{session_id}.json"))
    }

    fn registered_path(&self, token: &str) -> PathBuf {
        self.base_path
            .join("registered")
            .join(format!("{token}.json"))
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        self.base_path.join("users").join(format!("{user_id}.json"))
    }

    // -------------------------------------------------------------------
    // Anonymous sessions
    // -------------------------------------------------------------------

    /// Persist a new anonymous session.
    ///
    /// A session identifier, once issued, is never reissued to a different
    /// logical session: a colliding id is rejected, not overwritten.
    pub fn create_anonymous(
        &self,
        session: AnonymousSession,
    ) -> Result<AnonymousSession, SessionStoreError> {
        self.ensure_dirs()?;

        let path = self.anon_path(&session.session_id);
        {
            let cache = self.anonymous.read();
            if cache.contains_key(&session.session_id) || path.exists() {
                return Err(SessionStoreError::AlreadyExists(session.session_id));
            }
        }

        write_json(&path, &session)?;
        self.anonymous
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    /// Get an anonymous session by id.
    pub fn get_anonymous(&self, session_id: &str) -> Result<AnonymousSession, SessionStoreError> {
        if !is_safe_key(session_id) {
            return Err(SessionStoreError::NotFound(session_id.to_string()));
        }
        {
            let cache = self.anonymous.read();
            if let Some(session) = cache.get(session_id) {
                return Ok(session.clone());
            }
        }
        self.load_anonymous(session_id)
    }

    /// Refresh a session's activity timestamp.
    pub fn touch_anonymous(&self, session_id: &str) -> Result<AnonymousSession, SessionStoreError> {
        self.update_anonymous(session_id, |session| {
            session.last_active_at = now_millis();
        })
    }

    /// Overwrite the cached resource counter with `count`.
    pub fn set_resource_count(
        &self,
        session_id: &str,
        count: u64,
    ) -> Result<AnonymousSession, SessionStoreError> {
        self.update_anonymous(session_id, |session| {
            session.resource_count = count;
        })
    }

    /// Retire a session after migration: zero the counter and record where
    /// its resources went. The record is kept for audit.
    pub fn record_migration(
        &self,
        session_id: &str,
        user_id: &str,
        at: i64,
    ) -> Result<AnonymousSession, SessionStoreError> {
        let user_id = user_id.to_string();
        self.update_anonymous(session_id, move |session| {
            session.resource_count = 0;
            session.metadata.migrated_to = Some(user_id);
            session.metadata.migrated_at = Some(at);
        })
    }

    /// Delete an anonymous session record.
    pub fn delete_anonymous(&self, session_id: &str) -> Result<(), SessionStoreError> {
        // Existence check so a missing id surfaces as NotFound.
        self.get_anonymous(session_id)?;

        let path = self.anon_path(session_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.anonymous.write().remove(session_id);
        Ok(())
    }

    /// List anonymous sessions whose last activity is strictly before
    /// `cutoff`, oldest first.
    pub fn list_inactive_since(
        &self,
        cutoff: i64,
    ) -> Result<Vec<AnonymousSession>, SessionStoreError> {
        self.load_all_anonymous()?;

        let cache = self.anonymous.read();
        let mut stale: Vec<AnonymousSession> = cache
            .values()
            .filter(|s| s.last_active_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.last_active_at.cmp(&b.last_active_at));
        Ok(stale)
    }

    /// Number of anonymous sessions currently known to the store.
    pub fn anonymous_count(&self) -> Result<usize, SessionStoreError> {
        self.load_all_anonymous()?;
        Ok(self.anonymous.read().len())
    }

    pub(crate) fn update_anonymous<F>(
        &self,
        session_id: &str,
        apply: F,
    ) -> Result<AnonymousSession, SessionStoreError>
    where
        F: FnOnce(&mut AnonymousSession),
    {
        let mut session = self.get_anonymous(session_id)?;
        apply(&mut session);
        write_json(&self.anon_path(session_id), &session)?;
        self.anonymous
            .write()
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    fn load_anonymous(&self, session_id: &str) -> Result<AnonymousSession, SessionStoreError> {
        let path = self.anon_path(session_id);
        if !path.exists() {
            return Err(SessionStoreError::NotFound(session_id.to_string()));
        }
        let session: AnonymousSession = read_json(&path)?;
        self.anonymous
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    fn load_all_anonymous(&self) -> Result<(), SessionStoreError> {
        let dir = self.base_path.join("anon");
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match read_json::<AnonymousSession>(&path) {
                Ok(session) => {
                    self.anonymous
                        .write()
                        .entry(session.session_id.clone())
                        .or_insert(session);
                }
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable session record"
                    );
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Registered sessions
    // -------------------------------------------------------------------

    /// Persist a new registered-user session.
    pub fn create_registered(
        &self,
        session: RegisteredSession,
    ) -> Result<RegisteredSession, SessionStoreError> {
        self.ensure_dirs()?;

        let path = self.registered_path(&session.token);
        {
            let cache = self.registered.read();
            if cache.contains_key(&session.token) || path.exists() {
                return Err(SessionStoreError::AlreadyExists(session.token));
            }
        }

        write_json(&path, &session)?;
        self.registered
            .write()
            .insert(session.token.clone(), session.clone());
        Ok(session)
    }

    /// Get a registered session by token. An expired record is removed
    /// lazily and reported as NotFound.
    pub fn get_registered(&self, token: &str) -> Result<RegisteredSession, SessionStoreError> {
        if !is_safe_key(token) {
            return Err(SessionStoreError::NotFound(token.to_string()));
        }
        let session = {
            let cache = self.registered.read();
            cache.get(token).cloned()
        };
        let session = match session {
            Some(s) => s,
            None => {
                let path = self.registered_path(token);
                if !path.exists() {
                    return Err(SessionStoreError::NotFound(token.to_string()));
                }
                let s: RegisteredSession = read_json(&path)?;
                self.registered.write().insert(s.token.clone(), s.clone());
                s
            }
        };

        if session.is_expired(now_millis()) {
            self.delete_registered(token)?;
            return Err(SessionStoreError::NotFound(token.to_string()));
        }
        Ok(session)
    }

    /// Refresh a registered session's activity timestamp.
    pub fn touch_registered(&self, token: &str) -> Result<RegisteredSession, SessionStoreError> {
        let mut session = self.get_registered(token)?;
        session.last_active_at = now_millis();
        write_json(&self.registered_path(token), &session)?;
        self.registered
            .write()
            .insert(token.to_string(), session.clone());
        Ok(session)
    }

    /// Delete a registered session (logout).
    pub fn delete_registered(&self, token: &str) -> Result<(), SessionStoreError> {
        if !is_safe_key(token) {
            return Err(SessionStoreError::NotFound(token.to_string()));
        }
        let path = self.registered_path(token);
        let in_cache = self.registered.read().contains_key(token);
        if !in_cache && !path.exists() {
            return Err(SessionStoreError::NotFound(token.to_string()));
        }
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.registered.write().remove(token);
        Ok(())
    }

    /// Delete every registered session belonging to `user_id`
    /// (logout-everywhere, password change). Returns the number removed.
    pub fn delete_all_for_user(&self, user_id: &str) -> Result<usize, SessionStoreError> {
        let dir = self.base_path.join("registered");
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let session: RegisteredSession = match read_json(&path) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if session.user_id == user_id {
                fs::remove_file(&path)?;
                self.registered.write().remove(&session.token);
                removed += 1;
            }
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------

    /// Persist a new user account.
    pub fn create_user(&self, user: User) -> Result<User, SessionStoreError> {
        self.ensure_dirs()?;

        let path = self.user_path(&user.user_id);
        {
            let cache = self.users.read();
            if cache.contains_key(&user.user_id) || path.exists() {
                return Err(SessionStoreError::AlreadyExists(user.user_id));
            }
        }

        write_json(&path, &user)?;
        self.users.write().insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    /// Get a user by id.
    pub fn get_user(&self, user_id: &str) -> Result<User, SessionStoreError> {
        if !is_safe_key(user_id) {
            return Err(SessionStoreError::NotFound(user_id.to_string()));
        }
        {
            let cache = self.users.read();
            if let Some(user) = cache.get(user_id) {
                return Ok(user.clone());
            }
        }
        let path = self.user_path(user_id);
        if !path.exists() {
            return Err(SessionStoreError::NotFound(user_id.to_string()));
        }
        let user: User = read_json(&path)?;
        self.users.write().insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    /// Whether a user with this id exists.
    pub fn user_exists(&self, user_id: &str) -> Result<bool, SessionStoreError> {
        match self.get_user(user_id) {
            Ok(_) => Ok(true),
            Err(SessionStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Identifiers become file names; anything outside this alphabet is treated
/// as unknown rather than resolved as a path.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Write a record to `path` via a temp file and atomic rename.
fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), SessionStoreError> {
    let temp_path = path.with_extension("json.tmp");
    {
        let file = File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &PathBuf) -> Result<T, SessionStoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Get current time in milliseconds since Unix epoch
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
