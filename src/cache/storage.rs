//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use crate::net::Response;

/// A response read back from a named cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// Cache the entry was found in
  pub cache_name: String,
  /// The stored response
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for named request/response caches.
///
/// Keys are normalized request URLs (see [`crate::net::cache_key`]).
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, cache_name: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Look up a key across all caches, oldest cache first.
  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Keys stored in a cache, in insertion order.
  fn keys(&self, cache_name: &str) -> Result<Vec<String>>;

  /// Names of all caches, oldest first.
  fn cache_names(&self) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Wrap a connection whose schema is already migrated.
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn open_cache(conn: &Connection, cache_name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;
  Ok(())
}

type ResponseRow = (String, String, u16, String, Vec<u8>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResponseRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_cached(row: ResponseRow) -> Result<CachedResponse> {
  let (cache_name, url, status, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;

  Ok(CachedResponse {
    cache_name,
    response: Response {
      url,
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let conn = self.lock()?;
    open_cache(&conn, cache_name)
  }

  fn put_all(&self, cache_name: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    open_cache(&tx, cache_name)?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers for {}: {}", key, e))?;

      tx.execute(
        "INSERT OR REPLACE INTO responses (cache_name, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![cache_name, key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response for {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT r.cache_name, r.url, r.status, r.headers, r.body, r.cached_at
         FROM responses r
         INNER JOIN caches c ON c.name = r.cache_name
         WHERE r.url = ?
         ORDER BY c.id
         LIMIT 1",
        params![key],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query caches: {}", e))?;

    row.map(into_cached).transpose()
  }

  fn keys(&self, cache_name: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT url FROM responses WHERE cache_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![cache_name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", cache_name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
