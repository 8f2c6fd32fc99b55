use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::controller::{CacheConfig, Generation, Limits};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Generation tag embedded in partition names (e.g. "storea-v5.0")
  pub version: String,
  /// The storefront's own origin; relative asset paths resolve against it
  pub origin: String,
  /// Hosts of the remote data API (network-only with offline copy)
  #[serde(default)]
  pub api_hosts: Vec<String>,
  /// Static-asset CDNs served cache-first like the own origin
  #[serde(default = "default_trusted_hosts")]
  pub trusted_hosts: Vec<String>,
  /// Assets stored at install time; every one must be fetchable
  #[serde(default = "default_core_assets")]
  pub core_assets: Vec<String>,
  /// App shell served to offline navigations
  #[serde(default = "default_root_document")]
  pub root_document: String,
  #[serde(default)]
  pub limits: LimitsConfig,
  /// Replace the previous generation as soon as install succeeds
  #[serde(default = "default_skip_waiting")]
  pub skip_waiting: bool,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
  #[serde(default = "default_dynamic_limit")]
  pub dynamic: Option<usize>,
  #[serde(default = "default_image_limit")]
  pub images: Option<usize>,
}

impl Default for LimitsConfig {
  fn default() -> Self {
    Self {
      dynamic: default_dynamic_limit(),
      images: default_image_limit(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Directory for daily log files; stderr only when unset
  pub directory: Option<PathBuf>,
  /// Default filter when RUST_LOG is not set (e.g. "debug", "storecache=debug")
  pub level: Option<String>,
}

fn default_trusted_hosts() -> Vec<String> {
  vec![
    "fonts.googleapis.com".to_string(),
    "fonts.gstatic.com".to_string(),
  ]
}

fn default_core_assets() -> Vec<String> {
  ["./", "index.html", "manifest.json", "icons/icon-192.png", "icons/icon-512.png"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_root_document() -> String {
  "./".to_string()
}

fn default_dynamic_limit() -> Option<usize> {
  Some(50)
}

fn default_image_limit() -> Option<usize> {
  Some(100)
}

fn default_skip_waiting() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storecache/config.yaml
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
        "No configuration file found. Create one at ~/.config/storecache/config.yaml\n\
                 See storecache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storecache").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Build the immutable controller configuration, resolving every URL
  /// against the origin.
  pub fn cache_config(&self) -> Result<CacheConfig> {
    if self.version.trim().is_empty() {
      return Err(eyre!("Config field `version` must not be empty"));
    }

    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    let resolve = |s: &str| {
      origin
        .join(s)
        .map_err(|e| eyre!("Invalid asset URL {}: {}", s, e))
    };

    let core_assets = self
      .core_assets
      .iter()
      .map(|s| resolve(s))
      .collect::<Result<Vec<_>>>()?;

    Ok(CacheConfig {
      generation: Generation::new(
        self.version.trim(),
        Limits {
          dynamic: self.limits.dynamic,
          image: self.limits.images,
        },
      ),
      root_document: resolve(&self.root_document)?,
      origin,
      api_hosts: self.api_hosts.clone(),
      trusted_hosts: self.trusted_hosts.clone(),
      core_assets,
      skip_waiting_on_install: self.skip_waiting,
    })
  }

  /// Database location.
  ///
  /// Checks STORECACHE_DB first, then the config file, then the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("STORECACHE_DB") {
      return Ok(PathBuf::from(path));
    }
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storecache").join("cache.db"))
  }
}
