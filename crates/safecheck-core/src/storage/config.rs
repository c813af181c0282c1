//! TOML-based service configuration.
//!
//! Sections:
//! - `scheduler`: reminder interval and loop cadence
//! - `notifications`: push channel selection and fan-out limits
//! - `fcm`: Firebase Cloud Messaging credentials
//! - `security`: Argon2 parameters and the PIN verification floor
//! - `storage`: database file name
//!
//! Configuration is stored at `~/.config/safecheck/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;
use crate::notify::DEFAULT_FCM_ENDPOINT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Gap between a deadline and the next reminder.
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,
    /// Upper bound on how long the loop sleeps with nothing armed.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Create check-ins from timings as their time arrives.
    #[serde(default = "default_true")]
    pub materialize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `log` or `fcm`.
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcmConfig {
    #[serde(default)]
    pub project_id: String,
    /// Environment variable holding the OAuth access token.
    /// The token itself is never written to the config file.
    #[serde(default = "default_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Minimum wall time of every PIN verification.
    #[serde(default = "default_verify_floor")]
    pub verify_floor_ms: u64,
    #[serde(default = "default_argon2_memory")]
    pub argon2_memory_kib: u32,
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

/// Service configuration.
///
/// Serialized to/from TOML at `~/.config/safecheck/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub fcm: FcmConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_reminder_interval() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_channel() -> String {
    "log".into()
}
fn default_max_concurrent() -> usize {
    8
}
fn default_send_timeout() -> u64 {
    10
}
fn default_token_env() -> String {
    "SAFECHECK_FCM_TOKEN".into()
}
fn default_fcm_endpoint() -> String {
    DEFAULT_FCM_ENDPOINT.into()
}
fn default_verify_floor() -> u64 {
    250
}
fn default_argon2_memory() -> u32 {
    19_456
}
fn default_argon2_iterations() -> u32 {
    2
}
fn default_argon2_parallelism() -> u32 {
    1
}
fn default_database_file() -> String {
    "safecheck.db".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_interval_secs: default_reminder_interval(),
            poll_interval_secs: default_poll_interval(),
            materialize: true,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_channel(),
            max_concurrent_sends: default_max_concurrent(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            access_token_env: default_token_env(),
            endpoint: default_fcm_endpoint(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            verify_floor_ms: default_verify_floor(),
            argon2_memory_kib: default_argon2_memory(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
        }
    }
}

impl SchedulerConfig {
    pub fn reminder_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reminder_interval_secs as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl NotificationsConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl SecurityConfig {
    pub fn verify_floor(&self) -> Duration {
        Duration::from_millis(self.verify_floor_ms)
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
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;
            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|_| invalid(format!("expected true/false, got '{value}'")))?,
                ),
                serde_json::Value::Number(_) => serde_json::Value::Number(
                    value
                        .parse::<u64>()
                        .map_err(|_| invalid(format!("expected a whole number, got '{value}'")))?
                        .into(),
                ),
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// `config.toml` inside the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Database path resolved against the data directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join(&self.storage.database_file))
    }

    /// Load from the data directory, writing defaults on first run.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
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

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
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

    /// Set a value by dot-separated key without persisting.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a value by key and save to the data directory.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.scheduler.reminder_interval_secs == 0 {
            return invalid("scheduler.reminder_interval_secs", "must be positive");
        }
        if self.notifications.max_concurrent_sends == 0 {
            return invalid("notifications.max_concurrent_sends", "must be positive");
        }
        if self.notifications.send_timeout_secs == 0 {
            return invalid("notifications.send_timeout_secs", "must be positive");
        }
        if !matches!(self.notifications.channel.as_str(), "log" | "fcm") {
            return invalid("notifications.channel", "expected 'log' or 'fcm'");
        }
        if self.security.argon2_iterations == 0 || self.security.argon2_parallelism == 0 {
            return invalid("security", "argon2 iterations and parallelism must be positive");
        }
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
