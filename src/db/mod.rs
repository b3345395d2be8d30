use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Open or create a SQLite database at `path` and apply `schema`.
///
/// Schemas are written with `IF NOT EXISTS`, so opening an existing database
/// is idempotent.
pub fn open(path: &Path, schema: &str) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

  conn
    .busy_timeout(std::time::Duration::from_secs(5))
    .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

  conn
    .execute_batch(schema)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

  Ok(conn)
}

/// Get the default data directory.
pub fn default_data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("taskflow-offline"))
}
