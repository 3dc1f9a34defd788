use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use flux_core::types::SecretEntry;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Result, StoreError};

/// Global key/value secrets injected into every execution's environment.
pub struct SecretStore {
    db: Mutex<Connection>,
}

impl SecretStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert `key`, or overwrite its value if it already exists.
    pub fn upsert(&self, key: &str, value: &str) -> Result<SecretEntry> {
        let db = self.conn();
        db.execute(
            "INSERT INTO secrets (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        let id: i64 = db.query_row("SELECT id FROM secrets WHERE key = ?1", [key], |row| {
            row.get(0)
        })?;
        info!(secret_id = id, key, "secret saved");
        Ok(SecretEntry {
            id,
            key: key.to_string(),
        })
    }

    /// Insert `key` only when it is absent. Existing values are never touched.
    pub fn ensure_default(&self, key: &str, value: &str) -> Result<bool> {
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO secrets (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(n > 0)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let n = self
            .conn()
            .execute("DELETE FROM secrets WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound { kind: "secret", id });
        }
        info!(secret_id = id, "secret deleted");
        Ok(())
    }

    /// Id and key of every secret. Values stay out of listings.
    pub fn list(&self) -> Result<Vec<SecretEntry>> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT id, key FROM secrets ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(SecretEntry {
                id: row.get(0)?,
                key: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Snapshot of every key/value pair, for injection into a process.
    pub fn all(&self) -> Result<BTreeMap<String, String>> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT key, value FROM secrets")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row("SELECT value FROM secrets WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }
}
