mod records;

pub use records::RecordStore;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written { version: u64 },
    /// The stored version did not match the expected one (or the key
    /// already existed for an insert-only put).
    Conflict,
}

/// Opaque durable key/value map with per-key versions.
///
/// `put` with `expected = None` only inserts; with `Some(v)` it only
/// replaces a value whose current version is exactly `v`.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;
    async fn put(&self, key: &str, value: &str, expected: Option<u64>) -> Result<PutOutcome>;
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>>;
    /// Removes `key` if present.
    async fn delete(&self, key: &str) -> Result<()>;
}

pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path);
        info!("Opened workflow store at {}", path.display());
        Self::with_connection(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT value, version FROM kv_entries WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Versioned {
                        value: row.get(0)?,
                        version: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    async fn put(&self, key: &str, value: &str, expected: Option<u64>) -> Result<PutOutcome> {
        let db = self.db.lock().await;
        match expected {
            None => {
                let rows = db.execute(
                    "INSERT OR IGNORE INTO kv_entries (key, value, version) VALUES (?1, ?2, 1)",
                    params![key, value],
                )?;
                if rows == 0 {
                    return Ok(PutOutcome::Conflict);
                }
                Ok(PutOutcome::Written { version: 1 })
            }
            Some(version) => {
                let rows = db.execute(
                    "UPDATE kv_entries
                     SET value = ?1, version = version + 1, updated_at = CURRENT_TIMESTAMP
                     WHERE key = ?2 AND version = ?3",
                    params![value, key, version as i64],
                )?;
                if rows == 0 {
                    return Ok(PutOutcome::Conflict);
                }
                Ok(PutOutcome::Written {
                    version: version + 1,
                })
            }
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT key, value, version FROM kv_entries
             WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Versioned {
                    value: row.get(1)?,
                    version: row.get::<_, i64>(2)? as u64,
                },
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }
}
