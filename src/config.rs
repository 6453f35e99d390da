use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Where the cache and local store databases live
  /// (default: data dir, e.g. ~/.local/share/flagwatch)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Status feed endpoint, e.g. https://example.org/api/status
  pub status_url: String,
  /// History feed endpoint (default: sibling `history` of the status URL)
  pub history_url: Option<String>,
  /// Push subscription endpoint (default: sibling `subscribe`)
  pub subscribe_url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_retry_attempts")]
  pub retry_attempts: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_retry_attempts() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache generation; bumping it invalidates the static partition
  #[serde(default = "default_generation")]
  pub generation: String,
  /// TTL for dynamic (API) cache entries
  #[serde(default = "default_max_age_hours")]
  pub max_age_hours: i64,
  /// Static asset paths installed into the cache at startup
  #[serde(default)]
  pub precache: Vec<String>,
}

fn default_generation() -> String {
  "v1.0.0".to_string()
}

fn default_max_age_hours() -> i64 {
  24
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation: default_generation(),
      max_age_hours: default_max_age_hours(),
      precache: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// First hour (inclusive) of the daytime polling window
  #[serde(default = "default_daytime_start")]
  pub daytime_start_hour: u32,
  /// Last hour (inclusive) of the daytime polling window
  #[serde(default = "default_daytime_end")]
  pub daytime_end_hour: u32,
  /// Poll interval inside the daytime window
  #[serde(default = "default_daytime_interval")]
  pub daytime_interval_mins: u64,
  /// Poll interval overnight
  #[serde(default = "default_overnight_interval")]
  pub overnight_interval_mins: u64,
  /// Delay before the single pending retry after a failed fetch
  #[serde(default = "default_retry_delay_secs")]
  pub retry_delay_secs: u64,
}

fn default_daytime_start() -> u32 {
  8
}

fn default_daytime_end() -> u32 {
  18
}

fn default_daytime_interval() -> u64 {
  60
}

fn default_overnight_interval() -> u64 {
  360
}

fn default_retry_delay_secs() -> u64 {
  30
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      daytime_start_hour: default_daytime_start(),
      daytime_end_hour: default_daytime_end(),
      daytime_interval_mins: default_daytime_interval(),
      overnight_interval_mins: default_overnight_interval(),
      retry_delay_secs: default_retry_delay_secs(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./flagwatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/flagwatch/config.yaml
  /// 4. ~/.config/flagwatch/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/flagwatch/config.yaml\n\
                 or pass the status endpoint with --status-url."
      )),
    }
  }

  /// Build a configuration around a status URL given on the command line.
  pub fn from_status_url(status_url: String) -> Self {
    Self {
      api: ApiConfig {
        status_url,
        history_url: None,
        subscribe_url: None,
        timeout_secs: default_timeout_secs(),
        retry_attempts: default_retry_attempts(),
        retry_delay_ms: default_retry_delay_ms(),
      },
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      data_dir: None,
    }
  }

  /// Directory holding the cache and local store databases.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("flagwatch"))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("flagwatch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("flagwatch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_yaml_fills_defaults() {
    let config: Config = serde_yaml::from_str(
      "api:\n  status_url: https://example.org/api/status\n",
    )
    .unwrap();

    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.api.retry_attempts, 3);
    assert_eq!(config.cache.generation, "v1.0.0");
    assert_eq!(config.cache.max_age_hours, 24);
    assert_eq!(config.sync.daytime_start_hour, 8);
    assert_eq!(config.sync.daytime_end_hour, 18);
    assert_eq!(config.sync.retry_delay_secs, 30);
  }

  #[test]
  fn overrides_are_honored() {
    let config: Config = serde_yaml::from_str(
      "api:\n  status_url: https://example.org/api/status\n  timeout_secs: 5\n\
       sync:\n  daytime_interval_mins: 15\n\
       cache:\n  generation: v2.0.0\n  precache:\n    - /index.html\n",
    )
    .unwrap();

    assert_eq!(config.api.timeout_secs, 5);
    assert_eq!(config.sync.daytime_interval_mins, 15);
    assert_eq!(config.cache.generation, "v2.0.0");
    assert_eq!(config.cache.precache, vec!["/index.html".to_string()]);
  }
}
