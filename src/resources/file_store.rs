//! File-backed resource catalog.
//!
//! Resource records are stored as JSON metadata files; dependent records
//! (one JSONL sidecar per dependent kind) are append-friendly, mirroring how
//! the rest of the state directory is laid out.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use super::{Owner, ResourceRecord, ResourceStore, ResourceStoreError, DEPENDENT_KINDS};

/// Thread-safe resource catalog with file-based persistence.
#[derive(Debug)]
pub struct FileResourceStore {
    base_path: PathBuf,
    records: RwLock<HashMap<String, ResourceRecord>>,
}

impl Default for FileResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileResourceStore {
    /// Create a catalog rooted at the default state directory.
    pub fn new() -> Self {
        let base_path = if let Ok(dir) = std::env::var("GUESTPASS_STATE_DIR") {
            PathBuf::from(dir).join("resources")
        } else {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(".config"))
                .join("guestpass")
                .join("resources")
        };
        Self::with_base_path(base_path)
    }

    /// Create a catalog rooted at a custom base path.
    pub fn with_base_path(base_path: PathBuf) -> Self {
        Self {
            base_path,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Base path for this catalog's data.
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn ensure_base_dir(&self) -> Result<(), ResourceStoreError> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path)?;
        }
        Ok(())
    }

    fn meta_path(&self, resource_id: &str) -> PathBuf {
        self.base_path.join(format!("{resource_id}.json"))
    }

    fn dependent_path(&self, resource_id: &str, kind: &str) -> PathBuf {
        self.base_path.join(format!("{resource_id}.{kind}.jsonl"))
    }

    /// Append a dependent row (e.g. an annotation) to a resource's sidecar.
    pub fn append_dependent(
        &self,
        resource_id: &str,
        kind: &str,
        row: Value,
    ) -> Result<(), ResourceStoreError> {
        if !DEPENDENT_KINDS.contains(&kind) {
            return Err(ResourceStoreError::UnknownDependentKind(kind.to_string()));
        }
        self.load_record(resource_id)?;

        let path = self.dependent_path(resource_id, kind);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &row)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Number of dependent rows of `kind` attached to a resource.
    pub fn dependent_count(
        &self,
        resource_id: &str,
        kind: &str,
    ) -> Result<usize, ResourceStoreError> {
        let path = self.dependent_path(resource_id, kind);
        if !path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut count = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn load_record(&self, resource_id: &str) -> Result<ResourceRecord, ResourceStoreError> {
        {
            let records = self.records.read();
            if let Some(record) = records.get(resource_id) {
                return Ok(record.clone());
            }
        }

        let path = self.meta_path(resource_id);
        if !path.exists() {
            return Err(ResourceStoreError::NotFound(resource_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        let record: ResourceRecord = serde_json::from_str(&content)?;
        self.records
            .write()
            .insert(record.resource_id.clone(), record.clone());
        Ok(record)
    }

    fn load_all_from_disk(&self) -> Result<(), ResourceStoreError> {
        if !self.base_path.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<ResourceRecord>(&content) {
                Ok(record) => {
                    self.records
                        .write()
                        .entry(record.resource_id.clone())
                        .or_insert(record);
                }
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable resource record"
                    );
                }
            }
        }
        Ok(())
    }

    fn write_record(&self, record: &ResourceRecord) -> Result<(), ResourceStoreError> {
        self.ensure_base_dir()?;
        let path = self.meta_path(&record.resource_id);
        let temp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, record)?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

impl ResourceStore for FileResourceStore {
    fn create(&self, record: ResourceRecord) -> Result<ResourceRecord, ResourceStoreError> {
        self.ensure_base_dir()?;

        let path = self.meta_path(&record.resource_id);
        {
            let records = self.records.read();
            if records.contains_key(&record.resource_id) || path.exists() {
                return Err(ResourceStoreError::AlreadyExists(record.resource_id));
            }
        }

        self.write_record(&record)?;
        self.records
            .write()
            .insert(record.resource_id.clone(), record.clone());
        Ok(record)
    }

    fn owner_of(&self, resource_id: &str) -> Result<Owner, ResourceStoreError> {
        Ok(self.load_record(resource_id)?.owner)
    }

    fn list_owned_by_session(&self, session_id: &str) -> Result<Vec<String>, ResourceStoreError> {
        self.load_all_from_disk()?;

        let records = self.records.read();
        let mut owned: Vec<&ResourceRecord> = records
            .values()
            .filter(|r| r.owner.session_id() == Some(session_id))
            .collect();
        // Oldest first, so transfers and cascades run in creation order.
        owned.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        Ok(owned.iter().map(|r| r.resource_id.clone()).collect())
    }

    fn count_owned_by_session(&self, session_id: &str) -> Result<u64, ResourceStoreError> {
        Ok(self.list_owned_by_session(session_id)?.len() as u64)
    }

    fn reassign_to_user(
        &self,
        resource_id: &str,
        user_id: &str,
    ) -> Result<(), ResourceStoreError> {
        let mut record = self.load_record(resource_id)?;
        record.owner = Owner::User(user_id.to_string());
        self.write_record(&record)?;
        self.records
            .write()
            .insert(record.resource_id.clone(), record);
        Ok(())
    }

    fn delete_with_dependents(&self, resource_id: &str) -> Result<(), ResourceStoreError> {
        // Existence check so a missing id surfaces as NotFound.
        self.load_record(resource_id)?;

        // Dependents first, in declared order, then the resource itself.
        for kind in DEPENDENT_KINDS {
            let path = self.dependent_path(resource_id, kind);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        let meta = self.meta_path(resource_id);
        if meta.exists() {
            fs::remove_file(&meta)?;
        }
        self.records.write().remove(resource_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceRecord;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (FileResourceStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileResourceStore::with_base_path(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[test]
    fn test_create_and_owner_of() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        assert_eq!(
            store.owner_of(&record.resource_id).unwrap(),
            Owner::Session("anon_1_aa".into())
        );
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        let result = store.create(record.clone());
        assert!(matches!(result, Err(ResourceStoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_list_and_count_owned_by_session() {
        let (store, _temp) = create_test_store();

        for _ in 0..3 {
            store
                .create(ResourceRecord::for_session("anon_1_aa"))
                .unwrap();
        }
        store
            .create(ResourceRecord::for_session("anon_2_bb"))
            .unwrap();
        store.create(ResourceRecord::for_user("u1")).unwrap();

        assert_eq!(store.list_owned_by_session("anon_1_aa").unwrap().len(), 3);
        assert_eq!(store.count_owned_by_session("anon_1_aa").unwrap(), 3);
        assert_eq!(store.count_owned_by_session("anon_2_bb").unwrap(), 1);
        assert_eq!(store.count_owned_by_session("missing").unwrap(), 0);
    }

    #[test]
    fn test_list_sees_cold_disk_records() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().to_path_buf();

        {
            let store = FileResourceStore::with_base_path(base.clone());
            store
                .create(ResourceRecord::for_session("anon_1_aa"))
                .unwrap();
        }

        let store2 = FileResourceStore::with_base_path(base);
        assert_eq!(store2.count_owned_by_session("anon_1_aa").unwrap(), 1);
    }

    #[test]
    fn test_reassign_to_user_clears_session_ownership() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        store.reassign_to_user(&record.resource_id, "u1").unwrap();

        // Exactly one owner holds at any time.
        assert_eq!(
            store.owner_of(&record.resource_id).unwrap(),
            Owner::User("u1".into())
        );
        assert!(store.list_owned_by_session("anon_1_aa").unwrap().is_empty());
    }

    #[test]
    fn test_reassign_is_idempotent() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        store.reassign_to_user(&record.resource_id, "u1").unwrap();
        store.reassign_to_user(&record.resource_id, "u1").unwrap();
        assert_eq!(
            store.owner_of(&record.resource_id).unwrap(),
            Owner::User("u1".into())
        );
    }

    #[test]
    fn test_append_and_count_dependents() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        store
            .append_dependent(&record.resource_id, "annotations", json!({"note": "a"}))
            .unwrap();
        store
            .append_dependent(&record.resource_id, "annotations", json!({"note": "b"}))
            .unwrap();

        assert_eq!(
            store
                .dependent_count(&record.resource_id, "annotations")
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .dependent_count(&record.resource_id, "conversations")
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_append_unknown_dependent_kind_rejected() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        let result = store.append_dependent(&record.resource_id, "likes", json!({}));
        assert!(matches!(
            result,
            Err(ResourceStoreError::UnknownDependentKind(_))
        ));
    }

    #[test]
    fn test_delete_with_dependents_removes_sidecars() {
        let (store, _temp) = create_test_store();

        let record = store
            .create(ResourceRecord::for_session("anon_1_aa"))
            .unwrap();
        store
            .append_dependent(&record.resource_id, "annotations", json!({"note": "a"}))
            .unwrap();
        store
            .append_dependent(
                &record.resource_id,
                "collection_memberships",
                json!({"collection": "c1"}),
            )
            .unwrap();

        store.delete_with_dependents(&record.resource_id).unwrap();

        assert!(matches!(
            store.owner_of(&record.resource_id),
            Err(ResourceStoreError::NotFound(_))
        ));
        for kind in DEPENDENT_KINDS {
            assert!(!store.dependent_path(&record.resource_id, kind).exists());
        }
    }

    #[test]
    fn test_delete_missing_resource_is_not_found() {
        let (store, _temp) = create_test_store();
        assert!(matches!(
            store.delete_with_dependents("nope"),
            Err(ResourceStoreError::NotFound(_))
        ));
    }
}
