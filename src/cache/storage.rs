//! Cache storage trait and SQLite implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::http::{RequestKey, Response};

/// A stored response together with where and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// Partition the entry was found in
  pub partition: String,
  pub key: RequestKey,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Which registration slot a generation version occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationSlot {
  Active,
  Waiting,
}

impl RegistrationSlot {
  fn as_str(self) -> &'static str {
    match self {
      RegistrationSlot::Active => "active",
      RegistrationSlot::Waiting => "waiting",
    }
  }
}

/// Trait for cache storage backends.
///
/// Implementations must tolerate concurrent callers. Writes to the same
/// identity are last-write-wins.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create a partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of all partitions present in storage.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and every entry in it. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Look up a stored response in one partition.
  fn lookup(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up a stored response in the given partitions, first match wins.
  fn lookup_any(&self, partitions: &[String], key: &RequestKey) -> Result<Option<CachedResponse>> {
    for partition in partitions {
      if let Some(found) = self.lookup(partition, key)? {
        return Ok(Some(found));
      }
    }
    Ok(None)
  }

  /// Store a response, replacing any previous entry for the same identity.
  ///
  /// The entry becomes the newest in the partition's insertion order.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several responses atomically: either all are written or none are.
  fn put_batch(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Number of entries in a partition. Missing partitions hold zero entries.
  fn entry_count(&self, partition: &str) -> Result<usize>;

  /// Keys of a partition, oldest insertion first.
  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>>;

  /// Remove the oldest-inserted entry of a partition.
  fn evict_oldest(&self, partition: &str) -> Result<Option<RequestKey>>;

  /// Version recorded in a registration slot.
  fn registration(&self, slot: RegistrationSlot) -> Result<Option<String>>;

  /// Record (or clear, with `None`) the version in a registration slot.
  fn set_registration(&self, slot: RegistrationSlot, version: Option<&str>) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private database that lives only as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (partition, request identity); seq orders insertions
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    seq INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_seq ON entries(partition, seq);

CREATE TABLE IF NOT EXISTS registration (
    slot TEXT PRIMARY KEY,
    version TEXT NOT NULL
);
"#;

const INSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries
  (partition, request_hash, method, url, status, headers, body, seq, cached_at)
  VALUES (?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM entries), datetime('now'))";

fn insert_entry(
  conn: &Connection,
  partition: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

  conn
    .execute(
      INSERT_ENTRY,
      params![
        partition,
        key.cache_hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, partition, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("INSERT OR IGNORE INTO partitions (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;

    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn lookup(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE partition = ? AND request_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, partition, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        Ok(Some(CachedResponse {
          partition: partition.to_string(),
          key: key.clone(),
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, partition, key, response)
  }

  fn put_batch(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, partition, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", partition, e))?;

    Ok(count as usize)
  }

  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE partition = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| {
        Ok(RequestKey::from_parts(
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn evict_oldest(&self, partition: &str) -> Result<Option<RequestKey>> {
    let conn = self.lock()?;

    let oldest: Option<(String, String, String)> = conn
      .query_row(
        "SELECT request_hash, method, url FROM entries
         WHERE partition = ? ORDER BY seq LIMIT 1",
        params![partition],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to find oldest entry of {}: {}", partition, e))?;

    let Some((hash, method, url)) = oldest else {
      return Ok(None);
    };

    conn
      .execute(
        "DELETE FROM entries WHERE partition = ? AND request_hash = ?",
        params![partition, hash],
      )
      .map_err(|e| eyre!("Failed to evict {} from {}: {}", url, partition, e))?;

    Ok(Some(RequestKey::from_parts(method, url)))
  }

  fn registration(&self, slot: RegistrationSlot) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT version FROM registration WHERE slot = ?",
        params![slot.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} registration: {}", slot.as_str(), e))
  }

  fn set_registration(&self, slot: RegistrationSlot, version: Option<&str>) -> Result<()> {
    let conn = self.lock()?;

    match version {
      Some(version) => conn.execute(
        "INSERT OR REPLACE INTO registration (slot, version) VALUES (?, ?)",
        params![slot.as_str(), version],
      ),
      None => conn.execute(
        "DELETE FROM registration WHERE slot = ?",
        params![slot.as_str()],
      ),
    }
    .map_err(|e| eyre!("Failed to update {} registration: {}", slot.as_str(), e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use tempfile::TempDir;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://shop.example/").unwrap().join(path).unwrap();
    RequestKey::new(&Method::GET, &url)
  }

  fn storage() -> SqliteStorage {
    SqliteStorage::open_in_memory().unwrap()
  }

  #[test]
  fn test_put_and_lookup() {
    let storage = storage();
    let resp = Response::ok("text/html", "<html></html>").with_header("etag", "\"v1\"");

    storage.put("v1-static", &key("index.html"), &resp).unwrap();

    let found = storage
      .lookup("v1-static", &key("index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(found.response, resp);
    assert_eq!(found.partition, "v1-static");
    assert!(storage.lookup("v1-dynamic", &key("index.html")).unwrap().is_none());
    assert!(storage.lookup("v1-static", &key("other.html")).unwrap().is_none());
  }

  #[test]
  fn test_put_creates_partition() {
    let storage = storage();
    storage
      .put("v1-images", &key("a.png"), &Response::new(200))
      .unwrap();
    assert_eq!(storage.partition_names().unwrap(), vec!["v1-images"]);
  }

  #[test]
  fn test_overwrite_is_last_write_wins_and_moves_to_newest() {
    let storage = storage();
    storage.put("p", &key("a"), &Response::ok("text/plain", "old")).unwrap();
    storage.put("p", &key("b"), &Response::ok("text/plain", "b")).unwrap();
    storage.put("p", &key("a"), &Response::ok("text/plain", "new")).unwrap();

    assert_eq!(storage.entry_count("p").unwrap(), 2);
    let found = storage.lookup("p", &key("a")).unwrap().unwrap();
    assert_eq!(found.response.body, b"new");
    assert_eq!(storage.keys("p").unwrap(), vec![key("b"), key("a")]);
  }

  #[test]
  fn test_evict_oldest_follows_insertion_order() {
    let storage = storage();
    for name in ["a", "b", "c"] {
      storage.put("p", &key(name), &Response::new(200)).unwrap();
    }

    assert_eq!(storage.evict_oldest("p").unwrap(), Some(key("a")));
    assert_eq!(storage.evict_oldest("p").unwrap(), Some(key("b")));
    assert_eq!(storage.keys("p").unwrap(), vec![key("c")]);
    assert_eq!(storage.evict_oldest("empty").unwrap(), None);
  }

  #[test]
  fn test_delete_partition_removes_entries() {
    let storage = storage();
    storage.put("old-static", &key("a"), &Response::new(200)).unwrap();
    storage.put("new-static", &key("a"), &Response::new(200)).unwrap();

    assert!(storage.delete_partition("old-static").unwrap());
    assert!(!storage.delete_partition("old-static").unwrap());
    assert_eq!(storage.entry_count("old-static").unwrap(), 0);
    assert_eq!(storage.entry_count("new-static").unwrap(), 1);
    assert_eq!(storage.partition_names().unwrap(), vec!["new-static"]);
  }

  #[test]
  fn test_lookup_any_uses_first_match() {
    let storage = storage();
    storage.put("b", &key("x"), &Response::ok("text/plain", "from b")).unwrap();
    storage.put("c", &key("x"), &Response::ok("text/plain", "from c")).unwrap();

    let partitions = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let found = storage.lookup_any(&partitions, &key("x")).unwrap().unwrap();
    assert_eq!(found.partition, "b");
    assert!(storage.lookup_any(&partitions, &key("y")).unwrap().is_none());
  }

  #[test]
  fn test_put_batch() {
    let storage = storage();
    let entries = vec![
      (key("./"), Response::ok("text/html", "shell")),
      (key("manifest.json"), Response::ok("application/json", "{}")),
    ];
    storage.put_batch("v1-static", &entries).unwrap();

    assert_eq!(storage.entry_count("v1-static").unwrap(), 2);
    assert_eq!(storage.keys("v1-static").unwrap(), vec![key("./"), key("manifest.json")]);
  }

  #[test]
  fn test_registration_slots() {
    let storage = storage();
    assert_eq!(storage.registration(RegistrationSlot::Active).unwrap(), None);

    storage
      .set_registration(RegistrationSlot::Active, Some("v1"))
      .unwrap();
    storage
      .set_registration(RegistrationSlot::Waiting, Some("v2"))
      .unwrap();
    storage
      .set_registration(RegistrationSlot::Active, Some("v2"))
      .unwrap();
    storage.set_registration(RegistrationSlot::Waiting, None).unwrap();

    assert_eq!(
      storage.registration(RegistrationSlot::Active).unwrap(),
      Some("v2".to_string())
    );
    assert_eq!(storage.registration(RegistrationSlot::Waiting).unwrap(), None);
  }

  #[test]
  fn test_entries_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage
        .put("v1-dynamic", &key("api"), &Response::ok("application/json", "[]"))
        .unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let found = storage.lookup("v1-dynamic", &key("api")).unwrap().unwrap();
    assert_eq!(found.response.body, b"[]");
  }
}
