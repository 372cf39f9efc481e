use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheConfig, Overrides, RefetchOnMount};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Custom title for the status header
  pub title: Option<String>,
  #[serde(default)]
  pub cache: CacheSettings,
  /// Resources to keep subscribed
  #[serde(default)]
  pub watch: Vec<WatchConfig>,
}

/// Global cache defaults. Unset fields keep the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSettings {
  pub refetch_on_focus: Option<bool>,
  pub refetch_on_reconnect: Option<bool>,
  #[serde(default, with = "serde_yaml::with::singleton_map")]
  pub refetch_on_mount: Option<MountSetting>,
  pub polling_interval_ms: Option<u64>,
  /// Grace period before unused entries are removed
  pub keep_unused_for_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountSetting {
  Never,
  Always,
  OlderThanMs(u64),
}

impl From<MountSetting> for RefetchOnMount {
  fn from(setting: MountSetting) -> Self {
    match setting {
      MountSetting::Never => RefetchOnMount::Never,
      MountSetting::Always => RefetchOnMount::Always,
      MountSetting::OlderThanMs(ms) => RefetchOnMount::OlderThan(Duration::from_millis(ms)),
    }
  }
}

impl CacheSettings {
  pub fn to_cache_config(&self) -> CacheConfig {
    let defaults = CacheConfig::default();
    CacheConfig {
      refetch_on_focus: self.refetch_on_focus.unwrap_or(defaults.refetch_on_focus),
      refetch_on_reconnect: self
        .refetch_on_reconnect
        .unwrap_or(defaults.refetch_on_reconnect),
      refetch_on_mount: self
        .refetch_on_mount
        .map(RefetchOnMount::from)
        .unwrap_or(defaults.refetch_on_mount),
      polling_interval: self
        .polling_interval_ms
        .map(Duration::from_millis)
        .or(defaults.polling_interval),
      keep_unused_for: self
        .keep_unused_for_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.keep_unused_for),
    }
  }
}

/// One watched HTTP resource and its consumer overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
  pub name: String,
  pub url: Url,
  pub refetch_on_focus: Option<bool>,
  pub refetch_on_reconnect: Option<bool>,
  #[serde(default, with = "serde_yaml::with::singleton_map")]
  pub refetch_on_mount: Option<MountSetting>,
  pub polling_interval_ms: Option<u64>,
}

impl WatchConfig {
  pub fn overrides(&self) -> Overrides {
    Overrides {
      refetch_on_focus: self.refetch_on_focus,
      refetch_on_reconnect: self.refetch_on_reconnect,
      refetch_on_mount: self.refetch_on_mount.map(RefetchOnMount::from),
      polling_interval: self.polling_interval_ms.map(Duration::from_millis),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/qcache/config.yaml\n\
                 listing the resources to watch."
      )),
    }
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("qcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  const SAMPLE: &str = r#"
title: status board
cache:
  refetch_on_focus: false
  keep_unused_for_ms: 5000
  refetch_on_mount:
    older_than_ms: 30000
watch:
  - name: todos
    url: https://example.com/todos
    polling_interval_ms: 10000
  - name: users
    url: https://example.com/users
    refetch_on_focus: true
"#;

  #[test]
  fn test_parse_cache_settings() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    let cache = config.cache.to_cache_config();

    assert_eq!(config.title.as_deref(), Some("status board"));
    assert!(!cache.refetch_on_focus);
    assert!(cache.refetch_on_reconnect);
    assert_eq!(cache.keep_unused_for, Duration::from_millis(5000));
    assert_eq!(
      cache.refetch_on_mount,
      RefetchOnMount::OlderThan(Duration::from_secs(30))
    );
    assert_eq!(cache.polling_interval, None);
  }

  #[test]
  fn test_watch_overrides() {
    let config = Config::from_yaml(SAMPLE).unwrap();

    assert_eq!(config.watch.len(), 2);
    assert_eq!(
      config.watch[0].overrides(),
      Overrides::default().polling_interval(Duration::from_secs(10))
    );
    assert_eq!(
      config.watch[1].overrides(),
      Overrides::default().refetch_on_focus(true)
    );
  }

  #[test]
  fn test_mount_setting_accepts_name_or_map() {
    let config = Config::from_yaml(
      r#"
cache:
  refetch_on_mount: always
watch:
  - name: todos
    url: https://example.com/todos
    refetch_on_mount:
      older_than_ms: 250
  - name: users
    url: https://example.com/users
    refetch_on_mount: never
"#,
    )
    .unwrap();

    assert_eq!(
      config.cache.to_cache_config().refetch_on_mount,
      RefetchOnMount::Always
    );
    assert_eq!(
      config.watch[0].overrides().refetch_on_mount,
      Some(RefetchOnMount::OlderThan(Duration::from_millis(250)))
    );
    assert_eq!(
      config.watch[1].overrides().refetch_on_mount,
      Some(RefetchOnMount::Never)
    );
  }

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.cache.to_cache_config(), CacheConfig::default());
    assert!(config.watch.is_empty());
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.watch[1].name, "users");
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/qcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
