use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the application is served from, e.g. https://app.example.com
  #[serde(deserialize_with = "deserialize_url")]
  pub origin: Url,
  /// Deployment bundle (manifest + core files) written by the web build
  pub manifest: PathBuf,
  #[serde(default)]
  pub storage: StorageKind,
  /// SQLite database path (defaults to $XDG_DATA_HOME/shellcache/cache.db)
  pub cache_path: Option<PathBuf>,
  /// Directory for log files; logs go to stderr when unset
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// Persistent cache in a SQLite database
  #[default]
  Sqlite,
  /// Cache lives only as long as the process
  Memory,
}

fn deserialize_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  Url::parse(&raw).map_err(serde::de::Error::custom)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml\n\
                 It needs at least `origin` and `manifest`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents, path.parent())
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parse YAML contents. Relative paths are resolved against `base_dir`.
  pub fn parse(contents: &str, base_dir: Option<&Path>) -> Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    if !matches!(config.origin.scheme(), "http" | "https") {
      return Err(eyre!("origin must be an http(s) URL, got {}", config.origin));
    }

    if let Some(base) = base_dir {
      config.manifest = resolve(base, &config.manifest);
      config.cache_path = config.cache_path.map(|p| resolve(base, &p));
      config.log_dir = config.log_dir.map(|p| resolve(base, &p));
    }

    Ok(config)
  }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
  if path.is_relative() {
    base.join(path)
  } else {
    path.to_path_buf()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config() {
    let config = Config::parse(
      "origin: https://app.example.com\nmanifest: build/manifest.json\n",
      None,
    )
    .unwrap();

    assert_eq!(config.origin.as_str(), "https://app.example.com/");
    assert_eq!(config.manifest, PathBuf::from("build/manifest.json"));
    assert_eq!(config.storage, StorageKind::Sqlite);
    assert!(config.cache_path.is_none());
  }

  #[test]
  fn test_relative_paths_follow_config_dir() {
    let config = Config::parse(
      "origin: https://app.example.com\nmanifest: manifest.json\nstorage: memory\ncache_path: /var/cache/app.db\n",
      Some(Path::new("/etc/shellcache")),
    )
    .unwrap();

    assert_eq!(config.manifest, PathBuf::from("/etc/shellcache/manifest.json"));
    assert_eq!(config.cache_path, Some(PathBuf::from("/var/cache/app.db")));
    assert_eq!(config.storage, StorageKind::Memory);
  }

  #[test]
  fn test_rejects_non_http_origin() {
    let result = Config::parse("origin: ftp://files.example.com\nmanifest: m.json\n", None);
    assert!(result.is_err());
  }

  #[test]
  fn test_missing_explicit_file() {
    let err = Config::load(Some(Path::new("/nonexistent/shellcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
