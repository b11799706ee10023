//! Exclusion memory: the set of rule ids already selected.
//!
//! The in-process set is authoritative for the running daemon. When
//! persistence is enabled the set is mirrored into a redb table so that a
//! restarted daemon keeps excluding rules it already applied.
//!
//! # Table design
//!
//! ```text
//! EXCLUDED: rule id (&str) -> selected_at (unix millis, i64)
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

const EXCLUDED: TableDefinition<&str, i64> = TableDefinition::new("excluded");

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Memory(e.to_string())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Durable record of excluded rule ids.
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(EXCLUDED).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    pub fn insert(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(EXCLUDED).map_err(store_err)?;
            table
                .insert(id, at.timestamp_millis())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// All stored ids with their selection time, ordered by id.
    pub fn list(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(EXCLUDED).map_err(store_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (k, v) = entry.map_err(store_err)?;
            let at = Utc
                .timestamp_millis_opt(v.value())
                .single()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            out.push((k.value().to_string(), at));
        }
        Ok(out)
    }

    /// Remove every stored id. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let n = self.list()?.len();
        let wt = self.db.begin_write().map_err(store_err)?;
        wt.delete_table(EXCLUDED).map_err(store_err)?;
        wt.open_table(EXCLUDED).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// ExclusionMemory
// ---------------------------------------------------------------------------

/// Ids are only ever added. Growth is bounded by the size of the rule set.
#[derive(Default)]
pub struct ExclusionMemory {
    ids: HashSet<String>,
    store: Option<MemoryStore>,
}

impl ExclusionMemory {
    /// Process-lifetime memory; forgotten on restart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory mirrored to `path`, seeded with everything already stored there.
    pub fn persistent(path: &Path) -> Result<Self> {
        let store = MemoryStore::open(path)?;
        let ids = store.list()?.into_iter().map(|(id, _)| id).collect();
        Ok(Self {
            ids,
            store: Some(store),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorted snapshot of the excluded ids.
    pub fn ids(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// Add `id`. The in-process set is updated even when the durable write
    /// fails, so the id stays excluded for this process either way.
    pub(crate) fn insert(&mut self, id: &str) -> Result<()> {
        self.ids.insert(id.to_string());
        if let Some(store) = &self.store {
            store.insert(id, Utc::now())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn in_memory_insert_and_contains() {
        let mut m = ExclusionMemory::new();
        assert!(m.is_empty());
        m.insert("a").unwrap();
        m.insert("a").unwrap();
        assert!(m.contains("a"));
        assert_eq!(m.len(), 1);
        assert!(!m.is_persistent());
    }

    #[test]
    fn persistent_memory_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/memory.redb");
        {
            let mut m = ExclusionMemory::persistent(&path).unwrap();
            m.insert("r1").unwrap();
            m.insert("r2").unwrap();
        }
        let m = ExclusionMemory::persistent(&path).unwrap();
        assert_eq!(m.ids(), vec!["r1", "r2"]);
    }

    #[test]
    fn store_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.redb");
        let store = MemoryStore::open(&path).unwrap();
        store.insert("x", Utc::now()).unwrap();
        store.insert("y", Utc::now()).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn store_list_keeps_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(&dir.path().join("m.redb")).unwrap();
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        store.insert("r", at).unwrap();
        assert_eq!(store.list().unwrap(), vec![("r".to_string(), at)]);
    }
}
