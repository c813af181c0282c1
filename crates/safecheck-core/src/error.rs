//! Core error types for safecheck-core.
//!
//! Errors are grouped by how the caller should react: validation failures
//! never reach state mutation, conflicts mean another actor got there first,
//! and database errors are fatal for the current operation.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for safecheck-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input, rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Actor is not permitted to act on the target
    #[error("Moderator {moderator_id} is not permitted to act on {entity} {id}")]
    Unauthorized {
        moderator_id: i64,
        entity: &'static str,
        id: i64,
    },

    /// Stale or out-of-order transition
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Referenced record does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A submitted PIN matched neither stored hash.
    ///
    /// Deliberately carries no detail: every wrong PIN looks the same.
    #[error("Invalid PIN")]
    InvalidPin,

    /// Data-access failures
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// PIN hashing failed (bad parameters, corrupt hash)
    #[error("Credential error: {0}")]
    Credential(String),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value could not be mapped back to a domain type
    #[error("Corrupt value in column '{column}': {value}")]
    CorruptValue { column: &'static str, value: String },

    /// The connection mutex was poisoned by a panicking holder
    #[error("Database connection poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Could not resolve the data directory
    #[error("Cannot resolve data directory: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// PIN is not 4-6 ASCII digits
    #[error("PIN must be 4-6 digits")]
    PinFormat,

    /// Safe and danger PIN are identical
    #[error("Safe PIN and danger PIN must be different")]
    PinsIdentical,

    /// Time of day does not match HH:MM[:SS]
    #[error("Invalid time '{0}'; use HH:MM or HH:MM:SS")]
    TimeFormat(String),

    /// Weekday name not recognised
    #[error("Invalid day '{0}'")]
    Weekday(String),

    /// Required field missing or empty
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// Value is not a member of the closed set for this field
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Conflicting transitions. The operation was rejected without mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Check-in is not in a state that permits the transition
    #[error("Check-in {checkin_id} is {status}; cannot {operation}")]
    StaleCheckin {
        checkin_id: i64,
        status: String,
        operation: &'static str,
    },

    /// Snooze cap reached
    #[error("Maximum snooze attempts reached for check-in {0}")]
    SnoozeLimit(i64),

    /// PINs exist; changing them requires the current safe PIN
    #[error("PINs are already configured for user {0}")]
    PinsAlreadySet(i64),

    /// Alert already in a terminal state
    #[error("Alert {alert_id} is already {status}")]
    AlertClosed { alert_id: i64, status: String },

    /// Alert status change not permitted from the current status
    #[error("Alert {alert_id} cannot move from {from} to {to}")]
    AlertTransition {
        alert_id: i64,
        from: String,
        to: String,
    },
}

/// Errors reported by a push channel for one send.
///
/// Never surfaced to callers of the engine: stored on the attempt row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Provider rejected the token as unknown or expired
    #[error("Token is unregistered")]
    Unregistered,

    /// Provider returned a non-success status
    #[error("Provider error: HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// Network-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Send exceeded the configured timeout
    #[error("Send timed out after {0} ms")]
    Timeout(u64),

    /// Channel is not configured (missing credentials)
    #[error("Channel not configured: {0}")]
    NotConfigured(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
