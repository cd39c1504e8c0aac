//! Migration of anonymous activity to a registered account.
//!
//! Transfers every resource owned by an anonymous session to a user, then
//! retires the session: counter zeroed, provenance recorded, record kept for
//! audit. The operation is idempotent; a repeat call finds nothing left to
//! transfer and reports zero. It knows nothing about HTTP or how the caller
//! decided to invoke it.

use std::sync::Arc;
use tracing::{info, warn};

use crate::identity::token;
use crate::resources::ResourceStore;
use crate::sessions::{now_millis, SessionStore, SessionStoreError};

/// Error types for migration attempts
#[derive(Debug, Clone, thiserror::Error)]
pub enum MigrationError {
    #[error("Invalid session token format: {0}")]
    InvalidSessionFormat(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    /// The transfer stopped partway. Already-reassigned resources stay with
    /// the user; a re-run picks up the remainder.
    #[error("Transfer interrupted after {migrated} resources: {message}")]
    TransferInterrupted { migrated: usize, message: String },
    #[error("Store error: {0}")]
    Store(String),
}

/// Result of a completed migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Resources reassigned by this call.
    pub migrated: usize,
}

/// Transfers session-owned resources to registered users.
pub struct MigrationEngine {
    sessions: Arc<SessionStore>,
    resources: Arc<dyn ResourceStore>,
}

impl MigrationEngine {
    pub fn new(sessions: Arc<SessionStore>, resources: Arc<dyn ResourceStore>) -> Self {
        Self {
            sessions,
            resources,
        }
    }

    /// Move everything `session_id` owns to `user_id`.
    ///
    /// Validation failures abort with zero side effects. An empty session is
    /// a valid migration and reports zero.
    pub fn migrate(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<MigrationOutcome, MigrationError> {
        // Validate.
        if !token::is_valid_session_token(session_id) {
            return Err(MigrationError::InvalidSessionFormat(session_id.to_string()));
        }
        match self.sessions.get_anonymous(session_id) {
            Ok(_) => {}
            Err(SessionStoreError::NotFound(id)) => {
                return Err(MigrationError::SessionNotFound(id));
            }
            Err(e) => return Err(MigrationError::Store(e.to_string())),
        }
        match self.sessions.user_exists(user_id) {
            Ok(true) => {}
            Ok(false) => return Err(MigrationError::UserNotFound(user_id.to_string())),
            Err(e) => return Err(MigrationError::Store(e.to_string())),
        }

        // Collect.
        let owned = self
            .resources
            .list_owned_by_session(session_id)
            .map_err(|e| MigrationError::Store(e.to_string()))?;

        // Transfer.
        let mut migrated = 0;
        for resource_id in &owned {
            if let Err(e) = self.resources.reassign_to_user(resource_id, user_id) {
                warn!(
                    session_id,
                    user_id,
                    resource_id = %resource_id,
                    migrated,
                    error = %e,
                    "Migration transfer interrupted"
                );
                return Err(MigrationError::TransferInterrupted {
                    migrated,
                    message: e.to_string(),
                });
            }
            migrated += 1;
        }

        // Retire.
        self.sessions
            .record_migration(session_id, user_id, now_millis())
            .map_err(|e| MigrationError::Store(e.to_string()))?;

        info!(session_id, user_id, migrated, "Migrated anonymous session");
        Ok(MigrationOutcome { migrated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{
        FileResourceStore, Owner, ResourceRecord, ResourceStoreError,
    };
    use crate::sessions::{AnonymousSession, User};
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_engine() -> (
        MigrationEngine,
        Arc<SessionStore>,
        Arc<FileResourceStore>,
        TempDir,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::with_base_path(
            temp_dir.path().join("identity"),
        ));
        let resources = Arc::new(FileResourceStore::with_base_path(
            temp_dir.path().join("resources"),
        ));
        let engine = MigrationEngine::new(sessions.clone(), resources.clone());
        (engine, sessions, resources, temp_dir)
    }

    fn seed_session(sessions: &SessionStore) -> String {
        let session_id = token::mint_session_token();
        sessions
            .create_anonymous(AnonymousSession::new(&session_id))
            .unwrap();
        session_id
    }

    fn seed_user(sessions: &SessionStore) -> String {
        sessions.create_user(User::new(None)).unwrap().user_id
    }

    #[test]
    fn test_migrate_transfers_everything() {
        let (engine, sessions, resources, _temp) = create_engine();
        let session_id = seed_session(&sessions);
        let user_id = seed_user(&sessions);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                resources
                    .create(ResourceRecord::for_session(&session_id))
                    .unwrap()
                    .resource_id,
            );
        }
        sessions.set_resource_count(&session_id, 3).unwrap();
        // Dependent rows ride along with their resource.
        resources
            .append_dependent(&ids[0], "annotations", json!({"note": "keep"}))
            .unwrap();

        let outcome = engine.migrate(&session_id, &user_id).unwrap();
        assert_eq!(outcome.migrated, 3);

        // Every resource now belongs to the user; none to the session.
        for id in &ids {
            assert_eq!(
                resources.owner_of(id).unwrap(),
                Owner::User(user_id.clone())
            );
        }
        assert!(resources
            .list_owned_by_session(&session_id)
            .unwrap()
            .is_empty());
        // Dependents were transferred with the resource, not deleted.
        assert_eq!(resources.dependent_count(&ids[0], "annotations").unwrap(), 1);

        // The session is retired with provenance, not deleted.
        let retired = sessions.get_anonymous(&session_id).unwrap();
        assert_eq!(retired.resource_count, 0);
        assert_eq!(retired.metadata.migrated_to, Some(user_id));
        assert!(retired.metadata.migrated_at.is_some());
    }

    #[test]
    fn test_migrate_twice_is_idempotent() {
        let (engine, sessions, resources, _temp) = create_engine();
        let session_id = seed_session(&sessions);
        let user_id = seed_user(&sessions);

        for _ in 0..2 {
            resources
                .create(ResourceRecord::for_session(&session_id))
                .unwrap();
        }

        let first = engine.migrate(&session_id, &user_id).unwrap();
        assert_eq!(first.migrated, 2);

        let second = engine.migrate(&session_id, &user_id).unwrap();
        assert_eq!(second.migrated, 0);
        assert!(resources
            .list_owned_by_session(&session_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_migrate_empty_session_is_success() {
        let (engine, sessions, _resources, _temp) = create_engine();
        let session_id = seed_session(&sessions);
        let user_id = seed_user(&sessions);

        let outcome = engine.migrate(&session_id, &user_id).unwrap();
        assert_eq!(outcome.migrated, 0);
    }

    #[test]
    fn test_migrate_invalid_format_has_no_side_effects() {
        let (engine, sessions, _resources, _temp) = create_engine();
        let user_id = seed_user(&sessions);

        let result = engine.migrate("definitely-not-a-token", &user_id);
        assert!(matches!(
            result,
            Err(MigrationError::InvalidSessionFormat(_))
        ));
    }

    #[test]
    fn test_migrate_unknown_session() {
        let (engine, sessions, _resources, _temp) = create_engine();
        let user_id = seed_user(&sessions);

        let result = engine.migrate(&token::mint_session_token(), &user_id);
        assert!(matches!(result, Err(MigrationError::SessionNotFound(_))));
    }

    #[test]
    fn test_migrate_unknown_user_has_no_side_effects() {
        let (engine, sessions, resources, _temp) = create_engine();
        let session_id = seed_session(&sessions);
        resources
            .create(ResourceRecord::for_session(&session_id))
            .unwrap();

        let result = engine.migrate(&session_id, "no-such-user");
        assert!(matches!(result, Err(MigrationError::UserNotFound(_))));

        // Nothing moved, nothing retired.
        assert_eq!(resources.count_owned_by_session(&session_id).unwrap(), 1);
        assert!(!sessions.get_anonymous(&session_id).unwrap().is_migrated());
    }

    // ---------------------------------------------------------------
    // Partial-failure tolerance
    // ---------------------------------------------------------------

    /// Catalog double that fails reassignment of one chosen resource.
    struct InterruptingStore {
        inner: FileResourceStore,
        fail_on: Mutex<Option<String>>,
    }

    impl ResourceStore for InterruptingStore {
        fn create(
            &self,
            record: ResourceRecord,
        ) -> Result<ResourceRecord, ResourceStoreError> {
            self.inner.create(record)
        }

        fn owner_of(&self, resource_id: &str) -> Result<Owner, ResourceStoreError> {
            self.inner.owner_of(resource_id)
        }

        fn list_owned_by_session(
            &self,
            session_id: &str,
        ) -> Result<Vec<String>, ResourceStoreError> {
            self.inner.list_owned_by_session(session_id)
        }

        fn count_owned_by_session(&self, session_id: &str) -> Result<u64, ResourceStoreError> {
            self.inner.count_owned_by_session(session_id)
        }

        fn reassign_to_user(
            &self,
            resource_id: &str,
            user_id: &str,
        ) -> Result<(), ResourceStoreError> {
            if self.fail_on.lock().as_deref() == Some(resource_id) {
                return Err(ResourceStoreError::Io("injected failure".into()));
            }
            self.inner.reassign_to_user(resource_id, user_id)
        }

        fn delete_with_dependents(&self, resource_id: &str) -> Result<(), ResourceStoreError> {
            self.inner.delete_with_dependents(resource_id)
        }
    }

    #[test]
    fn test_interrupted_transfer_is_resumable() {
        let temp_dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::with_base_path(
            temp_dir.path().join("identity"),
        ));
        let catalog = Arc::new(InterruptingStore {
            inner: FileResourceStore::with_base_path(temp_dir.path().join("resources")),
            fail_on: Mutex::new(None),
        });
        let engine = MigrationEngine::new(sessions.clone(), catalog.clone());

        let session_id = seed_session(&sessions);
        let user_id = seed_user(&sessions);
        for _ in 0..3 {
            catalog
                .create(ResourceRecord::for_session(&session_id))
                .unwrap();
        }

        // Fail on the second resource in transfer order.
        let order = catalog.list_owned_by_session(&session_id).unwrap();
        *catalog.fail_on.lock() = Some(order[1].clone());

        let result = engine.migrate(&session_id, &user_id);
        match result {
            Err(MigrationError::TransferInterrupted { migrated, .. }) => {
                assert_eq!(migrated, 1);
            }
            other => panic!("expected TransferInterrupted, got {other:?}"),
        }
        // The session was not retired, so a retry still sees it.
        assert!(!sessions.get_anonymous(&session_id).unwrap().is_migrated());
        assert_eq!(catalog.count_owned_by_session(&session_id).unwrap(), 2);

        // Clear the fault; a re-run transfers the remainder.
        *catalog.fail_on.lock() = None;
        let outcome = engine.migrate(&session_id, &user_id).unwrap();
        assert_eq!(outcome.migrated, 2);
        assert!(catalog
            .list_owned_by_session(&session_id)
            .unwrap()
            .is_empty());
        assert!(sessions.get_anonymous(&session_id).unwrap().is_migrated());
    }
}
