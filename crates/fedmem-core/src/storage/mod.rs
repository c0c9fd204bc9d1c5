//! Storage layer.
//!
//! SQLite-backed persistence shared by every component. Vectors are stored
//! as little-endian `f32` BLOBs, metadata as JSON text. One writer connection
//! behind a mutex; a bounded round-robin pool of readers.

pub mod migrations;
pub mod store;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{MemoryError, Result};

pub use store::{
    FilterOrder, MetadataFilter, RowUpdate, SqliteVectorStore, TableStats, VectorStore,
};

/// Shared database handle.
///
/// All components hold an `Arc<Database>` and own disjoint tables. Connection
/// guards are released on every exit path by `Drop`, including cancellation.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl Database {
    /// Open (or create) the database, apply pragmas and migrations.
    ///
    /// `pool_max` bounds the reader pool; the writer is always a single
    /// dedicated connection.
    pub fn open(db_path: Option<PathBuf>, pool_max: usize) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("io", "federated-memory", "fedmem")
                    .ok_or_else(|| {
                        MemoryError::StorageFailure(
                            "could not determine project directories".to_string(),
                        )
                    })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir).map_err(|e| {
                    MemoryError::StorageFailure(format!("create data dir: {e}"))
                })?;
                data_dir.join("fedmem.db")
            }
        };

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        migrations::apply_migrations(&writer)?;

        let pool_max = pool_max.max(1);
        let mut readers = Vec::with_capacity(pool_max);
        for _ in 0..pool_max {
            let conn = Connection::open(&path)?;
            Self::configure_connection(&conn)?;
            readers.push(Mutex::new(conn));
        }

        tracing::info!(db = %path.display(), readers = pool_max, "database ready");

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Run `f` with the writer connection.
    pub fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .writer
            .lock()
            .map_err(|_| MemoryError::StorageFailure("writer lock poisoned".to_string()))?;
        f(&conn)
    }

    /// Run `f` inside a writer transaction. Rolls back on error.
    pub fn with_writer_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| MemoryError::StorageFailure("writer lock poisoned".to_string()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` with a reader connection (round-robin over the pool).
    pub fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|_| MemoryError::StorageFailure("reader lock poisoned".to_string()))?;
        f(&conn)
    }
}
