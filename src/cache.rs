// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! The metadata key-value store. Records are addressed by an alias, carry a
//! set of tags and a flat map of string fields. The build pipeline only
//! depends on the [`MetaStore`] contract; [`SqliteMetaStore`] is the default
//! implementation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use anyhow::Error as AnyError;
use parking_lot::Mutex;
use rusqlite::params;
use rusqlite::Connection;

pub trait MetaStore: Send + Sync {
  /// Looks up a record by alias, returning the requested KV fields. An
  /// empty field list selects every field. `None` means not found.
  fn get(
    &self,
    alias: &str,
    fields: &[&str],
  ) -> Result<Option<HashMap<String, String>>, AnyError>;

  fn put(
    &self,
    alias: &str,
    tags: &[&str],
    kv: &[(&str, &str)],
  ) -> Result<(), AnyError>;

  /// Returns whether a record was actually deleted.
  fn delete(&self, alias: &str) -> Result<bool, AnyError>;
}

pub struct SqliteMetaStore {
  conn: Mutex<Connection>,
}

impl SqliteMetaStore {
  pub fn new(db_file_path: &Path) -> Result<Self, AnyError> {
    let conn = Connection::open(db_file_path)
      .with_context(|| format!("opening {}", db_file_path.display()))?;
    Self::from_connection(conn)
  }

  pub fn in_memory() -> Result<Self, AnyError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, AnyError> {
    run_sqlite_pragma(&conn)?;
    conn.execute_batch(concat!(
      "CREATE TABLE IF NOT EXISTS records (",
      "alias TEXT PRIMARY KEY,",
      "tags TEXT NOT NULL,",
      "kv TEXT NOT NULL",
      ");"
    ))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

fn run_sqlite_pragma(conn: &Connection) -> Result<(), AnyError> {
  // enable write-ahead-logging mode
  let initial_pragmas = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    PRAGMA temp_store=memory;
    PRAGMA page_size=4096;
  ";
  conn.execute_batch(initial_pragmas)?;
  Ok(())
}

impl MetaStore for SqliteMetaStore {
  fn get(
    &self,
    alias: &str,
    fields: &[&str],
  ) -> Result<Option<HashMap<String, String>>, AnyError> {
    let conn = self.conn.lock();
    let mut stmt =
      conn.prepare_cached("SELECT kv FROM records WHERE alias=?1 LIMIT 1")?;
    let mut rows = stmt.query(params![alias])?;
    let Some(row) = rows.next()? else {
      return Ok(None);
    };
    let raw: String = row.get(0)?;
    let mut kv: HashMap<String, String> = serde_json::from_str(&raw)
      .with_context(|| format!("corrupt record for alias '{}'", alias))?;
    if !fields.is_empty() {
      kv.retain(|key, _| fields.contains(&key.as_str()));
    }
    Ok(Some(kv))
  }

  fn put(
    &self,
    alias: &str,
    tags: &[&str],
    kv: &[(&str, &str)],
  ) -> Result<(), AnyError> {
    let map: HashMap<&str, &str> = kv.iter().copied().collect();
    let encoded = serde_json::to_string(&map)?;
    let conn = self.conn.lock();
    let mut stmt = conn.prepare_cached(
      "INSERT OR REPLACE INTO records (alias, tags, kv) VALUES (?1, ?2, ?3)",
    )?;
    stmt.execute(params![alias, tags.join(","), encoded])?;
    Ok(())
  }

  fn delete(&self, alias: &str) -> Result<bool, AnyError> {
    let conn = self.conn.lock();
    let mut stmt =
      conn.prepare_cached("DELETE FROM records WHERE alias=?1")?;
    let deleted = stmt.execute(params![alias])?;
    Ok(deleted > 0)
  }
}
