pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Open or create the database at `path` and make sure the schema exists
pub fn open(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)?;
    }
  }

  let conn = Connection::open(path)?;
  run_migrations(&conn)?;
  Ok(conn)
}

/// Open a private in-memory database with the full schema
pub fn open_in_memory() -> Result<Connection> {
  let conn = Connection::open_in_memory()?;
  run_migrations(&conn)?;
  Ok(conn)
}

/// Get the default database path
pub fn default_path() -> Result<PathBuf> {
  let data_dir = data_dir()?;
  Ok(data_dir.join("cache.db"))
}

/// Directory holding the cache file and the log files
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| Error::Config("Could not determine data directory".into()))?;

  Ok(base.join("linkmirror"))
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> Result<()> {
  conn.execute_batch(schema::SCHEMA)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_migrations_are_idempotent() {
    let conn = open_in_memory().unwrap();
    run_migrations(&conn).unwrap();

    let tables: Vec<String> = conn
      .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
      .unwrap()
      .query_map([], |row| row.get(0))
      .unwrap()
      .collect::<std::result::Result<_, _>>()
      .unwrap();

    assert_eq!(tables, vec!["LinkLists", "Links", "Lists", "Metadata"]);
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    open(&path).unwrap();
    assert!(path.exists());

    // Reopening an existing file keeps working
    open(&path).unwrap();
  }
}
