//! The knowledge-base manager: the single owner of the durable table.
//!
//! All records live in an in-memory table behind one lock, and every
//! mutating call serializes the entire table to `knowledge_bases.json` as a
//! complete replace — no partial or incremental writes. On startup the table
//! is reconstructed from that file; a missing file means an empty table, and
//! a malformed file produces a warning and an empty table rather than a
//! crash.
//!
//! The manager is an explicit, injectable instance — never a global — and
//! its lock is the coordination point for all mutations within one process.
//! Concurrent creates racing on the same name are not treated as conflicts:
//! only the synthetic id is unique, not the (owner, name) pair.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::knowledge_base::{KnowledgeBase, ProcessingStatus};

const TABLE_FILE: &str = "knowledge_bases.json";

pub struct KnowledgeBaseManager {
    table_path: PathBuf,
    table: Mutex<HashMap<String, KnowledgeBase>>,
}

impl KnowledgeBaseManager {
    /// Open (or initialize) the manager under the given data directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let table_path = data_dir.join(TABLE_FILE);

        let table = if table_path.exists() {
            match std::fs::read_to_string(&table_path) {
                Ok(raw) => match serde_json::from_str::<HashMap<String, KnowledgeBase>>(&raw) {
                    Ok(table) => table,
                    Err(e) => {
                        eprintln!(
                            "Warning: could not parse {}: {}; starting with an empty table",
                            table_path.display(),
                            e
                        );
                        HashMap::new()
                    }
                },
                Err(e) => {
                    eprintln!(
                        "Warning: could not read {}: {}; starting with an empty table",
                        table_path.display(),
                        e
                    );
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            table_path,
            table: Mutex::new(table),
        })
    }

    /// Create a new knowledge base with `total_files` fixed and status
    /// `pending`, persisted immediately.
    pub fn create(
        &self,
        name: &str,
        owner_id: &str,
        owner_name: &str,
        description: &str,
        file_count: u32,
    ) -> Result<KnowledgeBase> {
        let kb = KnowledgeBase::new(
            generate_id(owner_id, name),
            name.to_string(),
            owner_id.to_string(),
            owner_name.to_string(),
            description.to_string(),
            file_count,
        );

        let mut table = self.table.lock().unwrap();
        table.insert(kb.id.clone(), kb.clone());
        self.save(&table)?;
        Ok(kb)
    }

    pub fn get(&self, id: &str) -> Option<KnowledgeBase> {
        self.table.lock().unwrap().get(id).cloned()
    }

    /// All knowledge bases for one owner, oldest first.
    pub fn list_for_owner(&self, owner_id: &str) -> Vec<KnowledgeBase> {
        let table = self.table.lock().unwrap();
        let mut kbs: Vec<KnowledgeBase> = table
            .values()
            .filter(|kb| kb.owner_id == owner_id)
            .cloned()
            .collect();
        kbs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        kbs
    }

    /// Case-insensitive exact name match within one owner's knowledge bases.
    pub fn find_by_owner_and_name(&self, owner_id: &str, name: &str) -> Option<KnowledgeBase> {
        let wanted = name.to_lowercase();
        let table = self.table.lock().unwrap();
        table
            .values()
            .find(|kb| kb.owner_id == owner_id && kb.name.to_lowercase() == wanted)
            .cloned()
    }

    /// Recompute the record's status from its counters, store it, and
    /// persist the table. Returns the stored record.
    pub fn update(&self, mut kb: KnowledgeBase) -> Result<KnowledgeBase> {
        kb.update_status();
        let mut table = self.table.lock().unwrap();
        table.insert(kb.id.clone(), kb.clone());
        self.save(&table)?;
        Ok(kb)
    }

    /// Persist a record with status forced to `failed`, skipping the usual
    /// recomputation. This is the system-level-failure path: recomputing
    /// from counters would silently upgrade the record to `partial` or
    /// `success` when the fault struck after the per-file pipeline.
    pub fn mark_failed(&self, mut kb: KnowledgeBase) -> Result<KnowledgeBase> {
        kb.status = ProcessingStatus::Failed;
        kb.updated_at = Utc::now();
        let mut table = self.table.lock().unwrap();
        table.insert(kb.id.clone(), kb.clone());
        self.save(&table)?;
        Ok(kb)
    }

    /// Remove a record and persist. Returns `false` (without error) when the
    /// id is absent, so a second delete is a cheap no-op.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut table = self.table.lock().unwrap();
        if table.remove(id).is_none() {
            return Ok(false);
        }
        self.save(&table)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self, table: &HashMap<String, KnowledgeBase>) -> Result<()> {
        let json = serde_json::to_string_pretty(table)?;
        std::fs::write(&self.table_path, json)
            .with_context(|| format!("Failed to write {}", self.table_path.display()))?;
        Ok(())
    }
}

/// Synthetic knowledge-base id: owner, name slug, creation time, and a
/// random suffix. The suffix keeps ids collision-free even when the same
/// owner creates identically named bases within one second.
fn generate_id(owner_id: &str, name: &str) -> String {
    let slug = name.to_lowercase().replace(' ', "_");
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        owner_id,
        slug,
        Utc::now().timestamp(),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::FileRecord;

    fn manager(dir: &Path) -> KnowledgeBaseManager {
        KnowledgeBaseManager::open(dir).unwrap()
    }

    #[test]
    fn create_starts_pending_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let kb = m.create("My Notes", "u1", "user one", "desc", 3).unwrap();
        assert_eq!(kb.status, ProcessingStatus::Pending);
        assert_eq!(kb.total_files, 3);
        assert!(dir.path().join(TABLE_FILE).exists());
        assert_eq!(m.get(&kb.id).unwrap(), kb);
    }

    #[test]
    fn ids_do_not_collide_for_identical_names() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let a = m.create("Same", "u1", "user", "", 1).unwrap();
        let b = m.create("Same", "u1", "user", "", 1).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn find_by_name_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let kb = m.create("My Notes", "u1", "user", "", 1).unwrap();
        assert_eq!(m.find_by_owner_and_name("u1", "my notes").unwrap().id, kb.id);
        assert_eq!(m.find_by_owner_and_name("u1", "MY NOTES").unwrap().id, kb.id);
        assert!(m.find_by_owner_and_name("u2", "my notes").is_none());
        assert!(m.find_by_owner_and_name("u1", "other").is_none());
    }

    #[test]
    fn list_is_scoped_to_owner() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.create("A", "u1", "user", "", 1).unwrap();
        m.create("B", "u1", "user", "", 1).unwrap();
        m.create("C", "u2", "other", "", 1).unwrap();
        assert_eq!(m.list_for_owner("u1").len(), 2);
        assert_eq!(m.list_for_owner("u2").len(), 1);
        assert!(m.list_for_owner("u3").is_empty());
    }

    #[test]
    fn update_recomputes_status() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let mut kb = m.create("N", "u1", "user", "", 1).unwrap();
        kb.add_file(FileRecord {
            filename: "a.txt".to_string(),
            success: true,
            chunks: 2,
            error: None,
            file_size: 10,
            processing_time_secs: 0.0,
        });
        let stored = m.update(kb).unwrap();
        assert_eq!(stored.status, ProcessingStatus::Success);
        assert_eq!(m.get(&stored.id).unwrap().status, ProcessingStatus::Success);
    }

    #[test]
    fn mark_failed_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let mut kb = m.create("N", "u1", "user", "", 1).unwrap();
        // Counters say "success" but a system fault forces failed.
        kb.add_file(FileRecord {
            filename: "a.txt".to_string(),
            success: true,
            chunks: 2,
            error: None,
            file_size: 10,
            processing_time_secs: 0.0,
        });
        kb.add_system_error("collection creation failed".to_string());
        let id = kb.id.clone();
        m.mark_failed(kb).unwrap();

        let reopened = manager(dir.path());
        let restored = reopened.get(&id).unwrap();
        assert_eq!(restored.status, ProcessingStatus::Failed);
        assert_eq!(restored.errors[0].filename, "system");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let kb = m.create("N", "u1", "user", "", 1).unwrap();
        assert!(m.delete(&kb.id).unwrap());
        assert!(!m.delete(&kb.id).unwrap());
        assert!(m.get(&kb.id).is_none());
    }

    #[test]
    fn reload_round_trips_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let kb = {
            let m = manager(dir.path());
            let mut kb = m.create("N", "u1", "user", "d", 2).unwrap();
            kb.add_error("bad.pdf", "PDF conversion failed: broken");
            m.update(kb).unwrap()
        };

        let reopened = manager(dir.path());
        let restored = reopened.get(&kb.id).unwrap();
        assert_eq!(restored, kb);
    }

    #[test]
    fn malformed_table_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TABLE_FILE), "{not json").unwrap();
        let m = manager(dir.path());
        assert!(m.is_empty());
        // And the manager still works afterwards.
        let kb = m.create("N", "u1", "user", "", 1).unwrap();
        assert!(m.get(&kb.id).is_some());
    }

    #[test]
    fn missing_table_is_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(m.is_empty());
    }
}
