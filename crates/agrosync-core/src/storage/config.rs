//! TOML-based application configuration.
//!
//! Holds:
//! - Remote store location, credentials and timeouts
//! - Embedded database file settings
//! - Sync batching and the extra tables included in a full sync
//!
//! Configuration is stored at `~/.config/agrosync/config.toml`. The remote
//! URL and key may also come from `AGROSYNC_REMOTE_URL` / `AGROSYNC_REMOTE_KEY`,
//! which take precedence over the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

use super::data_dir;
use crate::error::ConfigError;

pub const REMOTE_URL_ENV: &str = "AGROSYNC_REMOTE_URL";
pub const REMOTE_KEY_ENV: &str = "AGROSYNC_REMOTE_KEY";

/// Remote store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Table read by the connectivity probe.
    #[serde(default = "default_probe_table")]
    pub probe_table: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

/// Embedded database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default = "default_true")]
    pub enforce_foreign_keys: bool,
}

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Tables synced by a full sync in addition to the registered ones.
    #[serde(default)]
    pub extra_tables: Vec<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/agrosync/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

// Default functions
fn default_request_timeout() -> u64 {
    15
}
fn default_probe_table() -> String {
    "connection_test".into()
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_file_name() -> String {
    "agrosync.db".into()
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> u32 {
    100
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            probe_table: default_probe_table(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: default_file_name(),
            enforce_foreign_keys: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            extra_tables: Vec::new(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err("config key is empty".into());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| format!("unknown config key: {key}"))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| format!("unknown config key: {key}"))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(value.parse::<bool>()?),
                    serde_json::Value::Number(_) => {
                        serde_json::Value::Number(value.parse::<u64>()?.into())
                    }
                    // Lists accept JSON or a comma-separated string.
                    serde_json::Value::Array(_) => {
                        if value.trim_start().starts_with('[') {
                            serde_json::from_str(value)?
                        } else {
                            value
                                .split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(|s| serde_json::Value::String(s.to_string()))
                                .collect()
                        }
                    }
                    serde_json::Value::Object(_) => serde_json::from_str(value)?,
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| format!("unknown config key: {key}"))?;
        }

        Err(format!("unknown config key: {key}").into())
    }

    /// Location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk, writing the defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// `InvalidValue` if the key is unknown or the value does not parse.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value).map_err(|e| invalid(e.to_string()))?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Every leaf key with its current value, in dot-path form.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out
    }

    /// Remote URL and key, environment first, then the config file.
    ///
    /// # Errors
    ///
    /// `MissingKey` when either is absent or blank.
    pub fn remote_credentials(&self) -> Result<(String, String), ConfigError> {
        let url = resolve(REMOTE_URL_ENV, &self.remote.url, "remote.url")?;
        let key = resolve(REMOTE_KEY_ENV, &self.remote.api_key, "remote.api_key")?;
        Ok((url, key))
    }
}

fn resolve(env: &str, configured: &str, key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| configured.trim().to_string());
    if value.is_empty() {
        error!(key, env, "remote store configuration is missing");
        return Err(ConfigError::MissingKey(key.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.sync.batch_size, 100);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[remote]\nurl = \"https://x.supabase.co\"\n").unwrap();
        assert_eq!(parsed.remote.url, "https://x.supabase.co");
        assert_eq!(parsed.remote.probe_table, "connection_test");
        assert_eq!(parsed.store.file_name, "agrosync.db");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("sync.batch_size").as_deref(), Some("100"));
        assert_eq!(cfg.get("store.enforce_foreign_keys").as_deref(), Some("true"));
        assert!(cfg.get("store.missing_key").is_none());
    }

    #[test]
    fn set_value_updates_nested_fields() {
        let mut cfg = Config::default();
        cfg.set_value("sync.batch_size", "25").unwrap();
        cfg.set_value("store.enforce_foreign_keys", "false").unwrap();
        cfg.set_value("remote.url", "https://x.supabase.co").unwrap();
        cfg.set_value("sync.extra_tables", "harvest, notes").unwrap();
        assert_eq!(cfg.sync.batch_size, 25);
        assert!(!cfg.store.enforce_foreign_keys);
        assert_eq!(cfg.remote.url, "https://x.supabase.co");
        assert_eq!(cfg.sync.extra_tables, vec!["harvest", "notes"]);
    }

    #[test]
    fn set_value_rejects_unknown_key_and_bad_type() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set_value("sync.nonexistent", "1"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set_value("sync.batch_size", "lots").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_writes_defaults_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());

        let mut changed = cfg.clone();
        changed.set_value("remote.probe_timeout_secs", "2").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().remote.probe_timeout_secs, 2);
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\nbatch_size = \"many\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn entries_lists_leaf_keys() {
        let keys: Vec<String> = Config::default().entries().into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&"remote.url".to_string()));
        assert!(keys.contains(&"sync.extra_tables".to_string()));
    }

    #[test]
    fn missing_credentials_fail_with_missing_key() {
        // Only meaningful when the environment does not provide them.
        if std::env::var(REMOTE_URL_ENV).is_ok() || std::env::var(REMOTE_KEY_ENV).is_ok() {
            return;
        }
        let mut cfg = Config::default();
        assert_eq!(
            cfg.remote_credentials().unwrap_err().to_string(),
            ConfigError::MissingKey("remote.url".into()).to_string()
        );

        cfg.remote.url = "https://x.supabase.co".into();
        assert!(matches!(
            cfg.remote_credentials(),
            Err(ConfigError::MissingKey(key)) if key == "remote.api_key"
        ));

        cfg.remote.api_key = "anon".into();
        assert_eq!(
            cfg.remote_credentials().unwrap(),
            ("https://x.supabase.co".to_string(), "anon".to_string())
        );
    }
}
