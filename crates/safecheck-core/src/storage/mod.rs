mod config;
pub mod migrations;
mod safety_db;

pub use config::{
    Config, FcmConfig, NotificationsConfig, SchedulerConfig, SecurityConfig, StorageConfig,
};
pub use safety_db::SafetyDb;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/safecheck[-dev]/` based on SAFECHECK_ENV.
///
/// Set SAFECHECK_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("SAFECHECK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("safecheck-dev")
    } else {
        base_dir.join("safecheck")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
