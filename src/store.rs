use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::error::StoreError;

/// A single observed fingerprint for a location, with the interval during
/// which this notary has seen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
  pub fingerprint:      String,
  pub timestamp_start:  i64,
  pub timestamp_finish: i64,
}

/// The DDL for the single persisted table, matching the original CLI's
/// `createdb` subcommand exactly.
pub const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS fingerprints (\
  id INTEGER PRIMARY KEY, \
  location TEXT NOT NULL, \
  fingerprint TEXT NOT NULL, \
  timestamp_start INTEGER NOT NULL, \
  timestamp_finish INTEGER NOT NULL, \
  UNIQUE(location, fingerprint)\
)";

#[derive(Clone)]
pub struct FingerprintStore {
  pool: Pool<SqliteConnectionManager>,
}

impl FingerprintStore {
  /// Open (creating if absent) the SQLite database at `path` and ensure
  /// the schema exists.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let manager = SqliteConnectionManager::file(path.as_ref());
    let pool = Pool::new(manager)?;
    pool.get()?.execute(SCHEMA, [])?;
    Ok(Self { pool })
  }

  /// Run the `createdb` DDL against a fresh file. Used by the `createdb`
  /// CLI subcommand, separately from `open`, so the operator gets an
  /// explicit "database created" step.
  pub fn create_schema(path: impl AsRef<Path>) -> Result<(), StoreError> {
    let manager = SqliteConnectionManager::file(path.as_ref());
    let pool = Pool::new(manager)?;
    pool.get()?.execute(SCHEMA, [])?;
    Ok(())
  }

  fn location(host: &str, port: u16) -> String { format!("{host}:{port}") }

  /// All fingerprints ever observed at `(host, port)`, in unspecified order.
  pub fn get_records(&self, host: &str, port: u16) -> Result<Vec<FingerprintRecord>, StoreError> {
    let conn = self.pool.get()?;
    let mut stmt = conn.prepare(
      "SELECT fingerprint, timestamp_start, timestamp_finish FROM fingerprints WHERE location = ?1",
    )?;
    let location = Self::location(host, port);
    let rows = stmt.query_map(params![location], |row| {
      Ok(FingerprintRecord {
        fingerprint:      row.get(0)?,
        timestamp_start:  row.get(1)?,
        timestamp_finish: row.get(2)?,
      })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
  }

  /// Insert a new `(location, fingerprint)` row or advance `timestamp_finish`
  /// on the existing one. Returns the full post-update record set for the
  /// location. The transaction makes the read-modify-write atomic per
  /// location without serializing writes to disjoint locations.
  pub fn upsert(
    &self,
    host: &str,
    port: u16,
    fingerprint: &str,
    now: i64,
  ) -> Result<Vec<FingerprintRecord>, StoreError> {
    let mut conn = self.pool.get()?;
    let location = Self::location(host, port);

    let tx = conn.transaction()?;
    tx.execute(
      "INSERT INTO fingerprints (location, fingerprint, timestamp_start, timestamp_finish) \
       VALUES (?1, ?2, ?3, ?3) \
       ON CONFLICT(location, fingerprint) DO UPDATE SET timestamp_finish = ?3",
      params![location, fingerprint, now],
    )?;
    tx.commit()?;

    self.get_records(host, port)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn memory_store() -> FingerprintStore {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::new(manager).unwrap();
    pool.get().unwrap().execute(SCHEMA, []).unwrap();
    FingerprintStore { pool }
  }

  #[test]
  fn upsert_inserts_then_advances_finish() {
    let store = memory_store();
    let records = store.upsert("example.com", 443, "AA:BB:CC", 100).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp_start, 100);
    assert_eq!(records[0].timestamp_finish, 100);

    let records = store.upsert("example.com", 443, "AA:BB:CC", 200).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp_start, 100);
    assert_eq!(records[0].timestamp_finish, 200);
  }

  #[test]
  fn distinct_fingerprints_coexist() {
    let store = memory_store();
    store.upsert("example.com", 443, "AA:BB", 100).unwrap();
    store.upsert("example.com", 443, "CC:DD", 150).unwrap();
    let records = store.get_records("example.com", 443).unwrap();
    assert_eq!(records.len(), 2);
  }

  #[test]
  fn get_records_on_unknown_location_is_empty() {
    let store = memory_store();
    assert!(store.get_records("nowhere.example", 443).unwrap().is_empty());
  }
}
