//! String key/value store persisted in SQLite.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Durable string key/value storage, shared by everything in the agent
/// process.
pub struct LocalStorage {
  conn: Mutex<Connection>,
}

impl LocalStorage {
  /// Wrap a connection whose schema is already migrated.
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  pub fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO local_storage (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;

  #[test]
  fn test_missing_key_is_none() {
    let storage = LocalStorage::new(Database::open_in_memory().unwrap().into_connection());
    assert_eq!(storage.get_item("offline_orders").unwrap(), None);
  }

  #[test]
  fn test_set_overwrites() {
    let storage = LocalStorage::new(Database::open_in_memory().unwrap().into_connection());
    storage.set_item("k", "1").unwrap();
    storage.set_item("k", "2").unwrap();
    assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("2"));
  }
}
