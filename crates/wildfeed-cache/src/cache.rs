use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache connection poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key-value state store using SQLite
///
/// SQLite was chosen because:
/// - Zero-config embedded database
/// - Survives restarts without a server
/// - Doesn't require a separate process
///
/// Values are JSON text. Every row remembers when it was written so callers
/// can treat short-lived flags as expired.
pub struct CacheManager {
    conn: Mutex<Connection>,
}

impl CacheManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        debug!("Opened state store at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Store that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS client_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&*conn)
    }

    /// Raw JSON text stored under `key`, if any
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM client_state WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO client_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().timestamp_millis()],
            )?;
            Ok(())
        })
    }

    /// Milliseconds since the epoch when `key` was last written
    pub fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let ts = conn
                .query_row(
                    "SELECT updated_at FROM client_state WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(ts)
        })
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM client_state WHERE key = ?1", params![key])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_returns_none() {
        let cache = CacheManager::in_memory().unwrap();
        assert_eq!(cache.get_raw("stats.snapshot").unwrap(), None);
        assert_eq!(cache.updated_at("stats.snapshot").unwrap(), None);
    }

    #[test]
    fn test_set_get_and_overwrite() {
        let cache = CacheManager::in_memory().unwrap();
        cache.set_raw("counts", r#"{"birds":3}"#).unwrap();
        let first = cache.updated_at("counts").unwrap().unwrap();
        cache.set_raw("counts", r#"{"birds":5}"#).unwrap();

        assert_eq!(
            cache.get_raw("counts").unwrap().as_deref(),
            Some(r#"{"birds":5}"#)
        );
        assert!(cache.updated_at("counts").unwrap().unwrap() >= first);
    }

    #[test]
    fn test_delete() {
        let cache = CacheManager::in_memory().unwrap();
        cache.set_raw("view.mode", "\"map\"").unwrap();
        cache.delete("view.mode").unwrap();
        assert_eq!(cache.get_raw("view.mode").unwrap(), None);
        assert_eq!(cache.updated_at("view.mode").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        {
            let cache = CacheManager::new(&path).unwrap();
            cache.set_raw("view.mode", "\"grid\"").unwrap();
        }

        let cache = CacheManager::new(&path).unwrap();
        assert_eq!(
            cache.get_raw("view.mode").unwrap().as_deref(),
            Some("\"grid\"")
        );
    }
}
