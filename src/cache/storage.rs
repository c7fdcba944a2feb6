//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::key::{RequestKey, VarySnapshot};
use crate::net::{Request, Response, ResponseHeaders, ResponseKind};

/// Immutable snapshot of a response as it was written to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub status_text: String,
  pub headers: ResponseHeaders,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  pub url: Option<String>,
}

impl From<Response> for StoredResponse {
  fn from(response: Response) -> Self {
    Self {
      status: response.status,
      status_text: response.status_text,
      headers: response.headers,
      body: response.body,
      kind: response.kind,
      url: response.url.map(String::from),
    }
  }
}

impl StoredResponse {
  /// Rebuild a response exactly as stored.
  pub fn into_response(self) -> Response {
    let mut response = Response::new(self.status, self.body).with_kind(self.kind);
    response.status_text = self.status_text;
    response.headers = self.headers;
    response.url = self.url.and_then(|u| Url::parse(&u).ok());
    response
  }
}

/// Summary of one named store.
#[derive(Debug, Clone)]
pub struct StoreInfo {
  pub name: String,
  pub entries: usize,
  pub created_at: DateTime<Utc>,
}

/// Persisted lifecycle pointers for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationRecord {
  pub scope: String,
  /// Cache name of the active version
  pub active: Option<String>,
  /// Cache name of an installed version awaiting activation
  pub waiting: Option<String>,
}

/// Trait for cache storage backends.
///
/// Every call is atomic on its own. No locking is expected from callers.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Whether the named store exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// Names of all stores, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop a store and every entry in it. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up a request in a store, honouring the stored `Vary` snapshot.
  fn match_entry(&self, name: &str, request: &Request) -> Result<Option<Response>>;

  /// Store a response under the request's key, replacing any previous entry.
  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()>;

  /// Store several entries at once. Either all are written or none.
  fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()>;

  fn info(&self, name: &str) -> Result<Option<StoreInfo>>;

  fn load_registration(&self, scope: &str) -> Result<Option<RegistrationRecord>>;

  fn save_registration(&self, record: &RegistrationRecord) -> Result<()>;
}

/// An entry ready to be written, after validation.
pub(crate) struct PreparedEntry {
  pub key: RequestKey,
  pub vary: VarySnapshot,
  pub response: StoredResponse,
}

/// Reject what a cache store can never hold.
pub(crate) fn prepare_entry(request: &Request, response: Response) -> Result<PreparedEntry> {
  let key = RequestKey::for_request(request);
  if !key.is_cacheable_method() {
    return Err(eyre!(
      "Request method '{}' is unsupported for caching",
      key.method()
    ));
  }
  if !matches!(request.url.scheme(), "http" | "https") {
    return Err(eyre!("Request scheme '{}' is unsupported", request.url.scheme()));
  }
  if response.status == 206 {
    return Err(eyre!("Partial response for {} cannot be cached", key.url()));
  }

  let vary = VarySnapshot::capture(request, &response);
  if vary.is_wildcard() {
    return Err(eyre!("Response for {} has 'Vary: *'", key.url()));
  }

  Ok(PreparedEntry {
    key,
    vary,
    response: response.into(),
  })
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

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

  /// Get the default database path.
  pub fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
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
PRAGMA foreign_keys = ON;

-- Named stores, one per cache version
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL,
    response BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, key_hash),
    FOREIGN KEY (cache_name) REFERENCES cache_stores(name) ON DELETE CASCADE
);

-- Active / waiting version per scope
CREATE TABLE IF NOT EXISTS registrations (
    scope TEXT PRIMARY KEY,
    active TEXT,
    waiting TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn store_exists(conn: &Connection, name: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row(
      "SELECT 1 FROM cache_stores WHERE name = ?",
      params![name],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to look up cache store {}: {}", name, e))?;
  Ok(found.is_some())
}

fn insert_entry(conn: &Connection, name: &str, entry: &PreparedEntry) -> Result<()> {
  let vary =
    serde_json::to_string(&entry.vary).map_err(|e| eyre!("Failed to serialize vary: {}", e))?;
  let response = serde_json::to_vec(&entry.response)
    .map_err(|e| eyre!("Failed to serialize response: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (cache_name, key_hash, method, url, vary, response, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        entry.key.cache_hash(),
        entry.key.method(),
        entry.key.url(),
        vary,
        response
      ],
    )
    .map_err(|e| eyre!("Failed to store entry for {}: {}", entry.key.url(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    store_exists(&conn, name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_entry(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let key = RequestKey::for_request(request);
    if !key.is_cacheable_method() {
      return Ok(None);
    }

    let conn = self.lock()?;
    let row: Option<(String, Vec<u8>)> = conn
      .query_row(
        "SELECT vary, response FROM cache_entries WHERE cache_name = ? AND key_hash = ?",
        params![name, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    let Some((vary, data)) = row else {
      return Ok(None);
    };

    let vary: VarySnapshot =
      serde_json::from_str(&vary).map_err(|e| eyre!("Failed to deserialize vary: {}", e))?;
    if !vary.matches(request) {
      return Ok(None);
    }

    let stored: StoredResponse = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize response: {}", e))?;
    Ok(Some(stored.into_response()))
  }

  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
    let entry = prepare_entry(request, response)?;
    let conn = self.lock()?;
    if !store_exists(&conn, name)? {
      return Err(eyre!("Cache store {} does not exist", name));
    }
    insert_entry(&conn, name, &entry)
  }

  fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    let prepared = entries
      .into_iter()
      .map(|(request, response)| prepare_entry(&request, response))
      .collect::<Result<Vec<_>>>()?;

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if !store_exists(&tx, name)? {
      return Err(eyre!("Cache store {} does not exist", name));
    }
    for entry in &prepared {
      insert_entry(&tx, name, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn info(&self, name: &str) -> Result<Option<StoreInfo>> {
    let conn = self.lock()?;
    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT s.created_at, COUNT(e.key_hash) FROM cache_stores s
         LEFT JOIN cache_entries e ON e.cache_name = s.name
         WHERE s.name = ?
         GROUP BY s.name",
        params![name],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache store {}: {}", name, e))?;

    match row {
      Some((created_at, entries)) => Ok(Some(StoreInfo {
        name: name.to_string(),
        entries: entries as usize,
        created_at: parse_datetime(&created_at)?,
      })),
      None => Ok(None),
    }
  }

  fn load_registration(&self, scope: &str) -> Result<Option<RegistrationRecord>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT active, waiting FROM registrations WHERE scope = ?",
        params![scope],
        |row| {
          Ok(RegistrationRecord {
            scope: scope.to_string(),
            active: row.get(0)?,
            waiting: row.get(1)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to load registration for {}: {}", scope, e))
  }

  fn save_registration(&self, record: &RegistrationRecord) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO registrations (scope, active, waiting, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![record.scope, record.active, record.waiting],
      )
      .map_err(|e| eyre!("Failed to save registration for {}: {}", record.scope, e))?;
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

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn storage() -> SqliteStorage {
    SqliteStorage::open_in_memory().unwrap()
  }

  #[test]
  fn test_open_is_idempotent_and_ordered() {
    let s = storage();
    s.open("app-cache-v0").unwrap();
    s.open("app-cache-v1").unwrap();
    s.open("app-cache-v0").unwrap();
    assert_eq!(s.keys().unwrap(), vec!["app-cache-v0", "app-cache-v1"]);
    assert!(s.has("app-cache-v1").unwrap());
    assert!(!s.has("app-cache-v2").unwrap());
  }

  #[test]
  fn test_put_then_match_returns_snapshot() {
    let s = storage();
    s.open("v1").unwrap();
    let req = get("http://localhost:5000/");
    let resp = Response::new(200, "<html>shell</html>")
      .with_header("Content-Type", "text/html")
      .with_status_text("OK");
    s.put("v1", &req, resp).unwrap();

    let hit = s.match_entry("v1", &req).unwrap().unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(hit.status_text, "OK");
    assert_eq!(hit.body, b"<html>shell</html>");
    assert_eq!(hit.header("content-type"), Some("text/html"));
    assert!(s.match_entry("v1", &get("http://localhost:5000/other")).unwrap().is_none());
  }

  #[test]
  fn test_non_utf8_header_survives_storage() {
    let s = storage();
    s.open("v1").unwrap();
    let req = get("http://localhost:5000/report.pdf");
    let disposition = b"attachment; filename=\"\xC5\x82a.pdf\"".to_vec();
    let mut resp = Response::new(200, "%PDF");
    resp
      .headers
      .push(("Content-Disposition".to_string(), disposition.clone()));
    resp.headers.push(("X-Legacy".to_string(), vec![0xE9, b't', 0xE9]));
    s.put("v1", &req, resp).unwrap();

    let hit = s.match_entry("v1", &req).unwrap().unwrap();
    assert_eq!(hit.header_bytes("content-disposition"), Some(disposition.as_slice()));
    assert_eq!(hit.header_bytes("x-legacy"), Some(&[0xE9, b't', 0xE9][..]));
  }

  #[test]
  fn test_put_replaces_previous_entry() {
    let s = storage();
    s.open("v1").unwrap();
    let req = get("http://localhost:5000/");
    s.put("v1", &req, Response::new(200, "first")).unwrap();
    s.put("v1", &req, Response::new(200, "second")).unwrap();

    assert_eq!(s.match_entry("v1", &req).unwrap().unwrap().body, b"second");
    assert_eq!(s.info("v1").unwrap().unwrap().entries, 1);
  }

  #[test]
  fn test_put_rejects_non_get() {
    let s = storage();
    s.open("v1").unwrap();
    let req = Request::new("POST", Url::parse("http://localhost:5000/trip/new").unwrap());
    assert!(s.put("v1", &req, Response::new(200, "ok")).is_err());
    assert_eq!(s.info("v1").unwrap().unwrap().entries, 0);
  }

  #[test]
  fn test_put_into_missing_store_fails() {
    let s = storage();
    let err = s
      .put("gone", &get("http://localhost:5000/"), Response::new(200, "x"))
      .unwrap_err();
    assert!(err.to_string().contains("does not exist"));
  }

  #[test]
  fn test_match_honours_vary() {
    let s = storage();
    s.open("v1").unwrap();
    let req = get("http://localhost:5000/").with_header("Accept-Language", "pl");
    let resp = Response::new(200, "witaj").with_header("Vary", "Accept-Language");
    s.put("v1", &req, resp).unwrap();

    assert!(s.match_entry("v1", &req).unwrap().is_some());
    let english = get("http://localhost:5000/").with_header("Accept-Language", "en");
    assert!(s.match_entry("v1", &english).unwrap().is_none());
  }

  #[test]
  fn test_put_all_is_all_or_nothing() {
    let s = storage();
    s.open("v1").unwrap();
    let entries = vec![
      (get("http://localhost:5000/"), Response::new(200, "shell")),
      (
        get("http://localhost:5000/static/css/style.css"),
        Response::new(200, "body {}").with_header("Vary", "*"),
      ),
    ];
    assert!(s.put_all("v1", entries).is_err());
    assert_eq!(s.info("v1").unwrap().unwrap().entries, 0);

    let entries = vec![
      (get("http://localhost:5000/"), Response::new(200, "shell")),
      (
        get("http://localhost:5000/static/css/style.css"),
        Response::new(200, "body {}"),
      ),
    ];
    s.put_all("v1", entries).unwrap();
    assert_eq!(s.info("v1").unwrap().unwrap().entries, 2);
  }

  #[test]
  fn test_delete_removes_store_and_entries() {
    let s = storage();
    s.open("v0").unwrap();
    let req = get("http://localhost:5000/");
    s.put("v0", &req, Response::new(200, "old")).unwrap();

    assert!(s.delete("v0").unwrap());
    assert!(!s.delete("v0").unwrap());
    assert!(s.keys().unwrap().is_empty());
    assert!(s.match_entry("v0", &req).unwrap().is_none());

    // Re-creating the store does not resurrect old entries
    s.open("v0").unwrap();
    assert!(s.match_entry("v0", &req).unwrap().is_none());
  }

  #[test]
  fn test_registration_round_trip() {
    let s = storage();
    let scope = "http://localhost:5000/";
    assert!(s.load_registration(scope).unwrap().is_none());

    let record = RegistrationRecord {
      scope: scope.to_string(),
      active: Some("app-cache-v1".to_string()),
      waiting: None,
    };
    s.save_registration(&record).unwrap();
    assert_eq!(s.load_registration(scope).unwrap(), Some(record));
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-01-15 10:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
