//! Owned-resource catalog.
//!
//! The narrow seam toward the resource-storage layer: the subsystem only
//! knows a resource by its identifier and its owner. Ownership is a tagged
//! enum, so a resource always belongs to exactly one of a user or an
//! anonymous session, never both and never neither.

mod file_store;

pub use file_store::FileResourceStore;

use serde::{Deserialize, Serialize};

/// Dependent record kinds attached to a resource, in deletion order.
///
/// Cascading cleanup iterates this list before removing the resource itself,
/// so a new dependent kind is added here without touching the sweep or
/// migration control flow.
pub const DEPENDENT_KINDS: &[&str] = &["collection_memberships", "annotations", "conversations"];

/// Error types for resource catalog operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceStoreError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Unknown dependent kind: {0}")]
    UnknownDependentKind(String),
}

impl From<std::io::Error> for ResourceStoreError {
    fn from(err: std::io::Error) -> Self {
        ResourceStoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ResourceStoreError {
    fn from(err: serde_json::Error) -> Self {
        ResourceStoreError::Serialization(err.to_string())
    }
}

/// The owner of a resource: a registered user or an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    User(String),
    Session(String),
}

impl Owner {
    /// The session id, if session-owned.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Owner::Session(id) => Some(id),
            Owner::User(_) => None,
        }
    }

    /// The user id, if user-owned.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Owner::User(id) => Some(id),
            Owner::Session(_) => None,
        }
    }
}

/// A saved resource as the subsystem sees it: identifier, owner, and a
/// little descriptive metadata. The full shape lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: String,
    pub owner: Owner,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ResourceRecord {
    /// Create a record owned by an anonymous session.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            resource_id: uuid::Uuid::new_v4().to_string(),
            owner: Owner::Session(session_id.into()),
            created_at: crate::sessions::now_millis(),
            title: None,
        }
    }

    /// Create a record owned by a registered user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            resource_id: uuid::Uuid::new_v4().to_string(),
            owner: Owner::User(user_id.into()),
            created_at: crate::sessions::now_millis(),
            title: None,
        }
    }

    /// Set a display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Storage operations the identity subsystem needs from the resource layer.
pub trait ResourceStore: Send + Sync {
    /// Persist a new resource record.
    fn create(&self, record: ResourceRecord) -> Result<ResourceRecord, ResourceStoreError>;

    /// Current owner of a resource.
    fn owner_of(&self, resource_id: &str) -> Result<Owner, ResourceStoreError>;

    /// Identifiers of every resource owned by `session_id`.
    fn list_owned_by_session(&self, session_id: &str) -> Result<Vec<String>, ResourceStoreError>;

    /// Ground-truth count of resources owned by `session_id`.
    fn count_owned_by_session(&self, session_id: &str) -> Result<u64, ResourceStoreError>;

    /// Reassign a resource to `user_id`, clearing any session ownership.
    fn reassign_to_user(&self, resource_id: &str, user_id: &str)
        -> Result<(), ResourceStoreError>;

    /// Delete a resource together with its dependent records, dependents
    /// first.
    fn delete_with_dependents(&self, resource_id: &str) -> Result<(), ResourceStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_accessors() {
        let by_user = Owner::User("u1".into());
        assert_eq!(by_user.user_id(), Some("u1"));
        assert_eq!(by_user.session_id(), None);

        let by_session = Owner::Session("anon_1_aa".into());
        assert_eq!(by_session.session_id(), Some("anon_1_aa"));
        assert_eq!(by_session.user_id(), None);
    }

    #[test]
    fn test_owner_serialization_is_tagged() {
        let owner = Owner::Session("anon_1_aa".into());
        let json = serde_json::to_value(&owner).unwrap();
        assert_eq!(json["kind"], "session");
        assert_eq!(json["id"], "anon_1_aa");

        let parsed: Owner = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, owner);
    }

    #[test]
    fn test_dependent_kinds_order() {
        // Membership and annotation rows reference resources directly and go
        // before conversations, which may reference either.
        assert_eq!(
            DEPENDENT_KINDS,
            &["collection_memberships", "annotations", "conversations"]
        );
    }

    #[test]
    fn test_record_builders() {
        let r = ResourceRecord::for_session("anon_1_aa").with_title("Saved video");
        assert_eq!(r.owner, Owner::Session("anon_1_aa".into()));
        assert_eq!(r.title, Some("Saved video".into()));
        assert!(!r.resource_id.is_empty());

        let r = ResourceRecord::for_user("u1");
        assert_eq!(r.owner, Owner::User("u1".into()));
    }
}
