//! Memory relationships.
//!
//! Typed links between two memories, possibly across modules. Purely
//! additive; deleting a memory cascade-deletes its incident relationships
//! through [`RelationshipStore::delete_incident`].

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::memory::{fmt_ts, parse_ts, RelationshipRecord};
use crate::storage::Database;

/// Input for creating a relationship.
#[derive(Debug, Clone)]
pub struct NewRelationship {
    pub source_module: String,
    pub source_memory_id: String,
    pub target_module: String,
    pub target_memory_id: String,
    pub relationship_type: String,
    pub strength: f32,
    pub metadata: Value,
}

/// User-scoped store over the `memory_relationships` table.
pub struct RelationshipStore {
    db: Arc<Database>,
}

impl RelationshipStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, user_id: &str, input: NewRelationship) -> Result<RelationshipRecord> {
        if input.relationship_type.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "relationshipType must not be empty".to_string(),
            ));
        }
        let record = RelationshipRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            source_module: input.source_module,
            source_memory_id: input.source_memory_id,
            target_module: input.target_module,
            target_memory_id: input.target_memory_id,
            relationship_type: input.relationship_type,
            strength: input.strength.clamp(0.0, 1.0),
            metadata: input.metadata,
            created_at: Utc::now(),
        };
        let metadata = serde_json::to_string(&record.metadata)?;
        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO memory_relationships
                    (id, user_id, source_module, source_memory_id, target_module,
                     target_memory_id, relationship_type, strength, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.user_id,
                    record.source_module,
                    record.source_memory_id,
                    record.target_module,
                    record.target_memory_id,
                    record.relationship_type,
                    record.strength,
                    metadata,
                    fmt_ts(record.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Relationships where the memory is either endpoint.
    pub fn list_for(
        &self,
        user_id: &str,
        module_id: &str,
        memory_id: &str,
    ) -> Result<Vec<RelationshipRecord>> {
        self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, source_module, source_memory_id, target_module,
                        target_memory_id, relationship_type, strength, metadata, created_at
                 FROM memory_relationships
                 WHERE user_id = ?1
                   AND ((source_module = ?2 AND source_memory_id = ?3)
                     OR (target_module = ?2 AND target_memory_id = ?3))
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![user_id, module_id, memory_id], map_relationship)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Delete every relationship incident to the memory. Returns the number
    /// removed. Part of the module delete cascade.
    pub fn delete_incident(
        &self,
        user_id: &str,
        module_id: &str,
        memory_id: &str,
    ) -> Result<usize> {
        self.db.with_writer(|conn| {
            let n = conn.execute(
                "DELETE FROM memory_relationships
                 WHERE user_id = ?1
                   AND ((source_module = ?2 AND source_memory_id = ?3)
                     OR (target_module = ?2 AND target_memory_id = ?3))",
                params![user_id, module_id, memory_id],
            )?;
            Ok(n)
        })
    }

    pub fn count(&self, user_id: &str) -> Result<i64> {
        self.db.with_reader(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM memory_relationships WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }
}

fn map_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<RelationshipRecord> {
    let metadata: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    Ok(RelationshipRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source_module: row.get(2)?,
        source_memory_id: row.get(3)?,
        target_module: row.get(4)?,
        target_memory_id: row.get(5)?,
        relationship_type: row.get(6)?,
        strength: row.get(7)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Object(Default::default())),
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
    })
}
