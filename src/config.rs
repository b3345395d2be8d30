use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::db;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application is served from; relative URLs resolve against it
  pub origin: String,
  /// Build/version token baked into the partition names
  pub version: String,
  /// Path prefix of the application API
  pub api_prefix: String,
  /// Documentation/introspection paths that always go straight to network
  pub bypass_prefixes: Vec<String>,
  /// Background-sync tag this agent answers to
  pub sync_tag: String,
  /// Document served for navigations that fail while offline
  pub shell_document: String,
  /// Critical resources fetched at install time
  pub precache: Vec<String>,
  /// Take over from a previous instance without waiting for its pages to close
  pub skip_waiting: bool,
  /// Connect timeout for outgoing requests, in seconds
  pub connect_timeout_secs: u64,
  pub notification: NotificationConfig,
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5173".to_string(),
      version: "v1".to_string(),
      api_prefix: "/api/".to_string(),
      bypass_prefixes: [
        "/api/docs",
        "/api/redoc",
        "/api/openapi.json",
        "/docs",
        "/redoc",
        "/openapi.json",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      sync_tag: "sync-pending-requests".to_string(),
      shell_document: "/index.html".to_string(),
      precache: ["/", "/index.html", "/favicon.svg", "/manifest.json"]
        .into_iter()
        .map(String::from)
        .collect(),
      skip_waiting: true,
      connect_timeout_secs: 10,
      notification: NotificationConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub default_title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "TaskFlow".to_string(),
      default_body: "You have a new notification".to_string(),
      icon: "/favicon.svg".to_string(),
      badge: "/favicon.svg".to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// Persistent SQLite databases in the data directory
  #[default]
  Sqlite,
  /// Process memory only; nothing survives a restart
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: StorageBackend,
  /// Directory for databases and logs (defaults to the platform data dir)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./taskflow-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/taskflow-offline/config.yaml
  ///
  /// Defaults apply when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("taskflow-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("taskflow-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory holding the databases and log files.
  ///
  /// Checks TASKFLOW_OFFLINE_DATA_DIR first, then `storage.path`, then the
  /// platform data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TASKFLOW_OFFLINE_DATA_DIR") {
      return Ok(PathBuf::from(dir));
    }
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => db::default_data_dir(),
    }
  }
}
