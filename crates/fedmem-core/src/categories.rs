//! Category registry.
//!
//! Per-user advisory vocabulary for the tool surface. CMI entries keep
//! free-form category strings; this table only names and describes them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::memory::{fmt_ts, parse_ts};
use crate::storage::Database;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub parent: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct CategoryStore {
    db: Arc<Database>,
}

impl CategoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Idempotent upsert by `(user, name)`; re-registering refreshes the
    /// description, icon, and parent.
    pub fn register(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        icon: Option<&str>,
        parent: Option<&str>,
    ) -> Result<CategoryRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MemoryError::InvalidArgument(
                "category name must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO categories (id, user_id, name, description, icon, parent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id, name) DO UPDATE SET
                    description = excluded.description,
                    icon = excluded.icon,
                    parent = excluded.parent",
                params![id, user_id, name, description, icon, parent, fmt_ts(now)],
            )?;
            Ok(())
        })?;
        self.get(user_id, name)?.ok_or_else(|| {
            MemoryError::StorageFailure(format!("category {name} vanished after upsert"))
        })
    }

    pub fn get(&self, user_id: &str, name: &str) -> Result<Option<CategoryRecord>> {
        self.db.with_reader(|conn| {
            conn.query_row(
                "SELECT id, user_id, name, description, icon, parent, created_at
                 FROM categories WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                map_category,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Sorted by name.
    pub fn list(&self, user_id: &str) -> Result<Vec<CategoryRecord>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, name, description, icon, parent, created_at
                 FROM categories WHERE user_id = ?1 ORDER BY name ASC",
            )?;
            let rows = stmt
                .query_map(params![user_id], map_category)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Idempotent removal. Returns whether the category existed.
    pub fn remove(&self, user_id: &str, name: &str) -> Result<bool> {
        self.db.with_writer(|conn| {
            let n = conn.execute(
                "DELETE FROM categories WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
            )?;
            Ok(n > 0)
        })
    }
}

fn map_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<CategoryRecord> {
    let created_at: String = row.get(6)?;
    Ok(CategoryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        parent: row.get(5)?,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, CategoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(Some(dir.path().join("t.db")), 1).unwrap());
        (dir, CategoryStore::new(db))
    }

    #[test]
    fn register_is_idempotent_upsert() {
        let (_dir, store) = test_store();
        let first = store.register("u1", "projects", Some("work items"), None, None).unwrap();
        let second = store
            .register("u1", "projects", Some("active work"), Some("📁"), None)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.description.as_deref(), Some("active work"));
        assert_eq!(store.list("u1").unwrap().len(), 1);
    }

    #[test]
    fn list_is_sorted_and_user_scoped() {
        let (_dir, store) = test_store();
        store.register("u1", "zeta", None, None, None).unwrap();
        store.register("u1", "alpha", None, None, None).unwrap();
        store.register("u2", "other", None, None, None).unwrap();

        let names: Vec<_> = store.list("u1").unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, store) = test_store();
        store.register("u1", "temp", None, None, None).unwrap();
        assert!(store.remove("u1", "temp").unwrap());
        assert!(!store.remove("u1", "temp").unwrap());
    }
}
