use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Application shell precached on install.
pub const DEFAULT_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/style.css",
  "/script.js",
  "/manifest.json",
  "/icon-192.png",
  "/icon-512.png",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the asset paths and sync endpoint are resolved against
  pub origin: String,
  /// Name of the cache the asset list is stored in
  pub cache_name: String,
  /// Paths precached on install, in order
  pub assets: Vec<String>,
  pub sync: SyncConfig,
  pub network: NetworkConfig,
  pub watch: WatchConfig,
  /// Where the database and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Path orders are POSTed to
  pub endpoint: String,
  /// Background sync tag that triggers the flush
  pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// How often the connectivity probe runs
  pub interval_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      cache_name: "orders-v1".to_string(),
      assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
      watch: WatchConfig::default(),
      data_dir: None,
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      endpoint: "/api/sync_order".to_string(),
      tag: "sync-orders".to_string(),
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self { interval_secs: 15 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./orders-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/orders-offline/config.yaml
  ///
  /// Without any file the defaults are used. `ORDERS_OFFLINE_ORIGIN`
  /// overrides the origin either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("ORDERS_OFFLINE_ORIGIN") {
      config.origin = origin;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("orders-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("orders-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Reject settings the agent cannot work with.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.cache_name.is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }
    if self.network.timeout_secs == 0 {
      return Err(eyre!("network.timeout_secs must be greater than zero"));
    }
    if self.watch.interval_secs == 0 {
      return Err(eyre!("watch.interval_secs must be greater than zero"));
    }
    Ok(())
  }

  /// The origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Directory holding the database and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("orders-offline"))
  }

  /// Path of the agent database.
  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("agent.db"))
  }
}
