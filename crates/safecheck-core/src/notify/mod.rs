//! Push notification fan-out.
//!
//! Alerts and reminders are persisted first; delivery happens afterwards
//! and is best-effort. Every send, successful or not, leaves a
//! [`NotificationAttempt`] row behind.

mod channel;
mod dispatcher;
mod fcm;
mod message;

pub use channel::{LogChannel, PushChannel};
pub use dispatcher::{DeliveryReport, DispatcherConfig, NotificationDispatcher};
pub use fcm::{FcmChannel, DEFAULT_FCM_ENDPOINT};
pub use message::{org_topic, PushMessage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(ValidationError::InvalidValue {
                field: "device_type",
                value: other.to_string(),
            }),
        }
    }
}

/// A registered push endpoint. The token is the uniqueness key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub user_id: i64,
    pub token: String,
    pub platform: Platform,
    pub name: Option<String>,
    pub is_active: bool,
    pub last_used_at: DateTime<Utc>,
}

/// Where a single send goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PushTarget {
    Device(String),
    Topic(String),
}

impl PushTarget {
    pub fn label(&self) -> &str {
        match self {
            PushTarget::Device(token) | PushTarget::Topic(token) => token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InitialCheckin,
    SnoozeReminder(u8),
    AdminAlert,
}

impl NotificationKind {
    pub fn as_string(self) -> String {
        match self {
            NotificationKind::InitialCheckin => "initial_checkin".to_string(),
            NotificationKind::SnoozeReminder(n) => format!("snooze_reminder_{n}"),
            NotificationKind::AdminAlert => "admin_alert".to_string(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidValue {
            field: "notification_type",
            value: s.to_string(),
        };
        match s {
            "initial_checkin" => Ok(NotificationKind::InitialCheckin),
            "admin_alert" => Ok(NotificationKind::AdminAlert),
            other => other
                .strip_prefix("snooze_reminder_")
                .and_then(|n| n.parse::<u8>().ok())
                .map(NotificationKind::SnoozeReminder)
                .ok_or_else(invalid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(ValidationError::InvalidValue {
                field: "delivery_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Audit row for one dispatch to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: i64,
    pub checkin_id: i64,
    pub alert_id: Option<i64>,
    pub user_id: i64,
    /// Device token or topic name.
    pub channel: String,
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// Attempt row before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotificationAttempt {
    pub reference: NotificationRef,
    pub channel: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// What a notification is about; copied onto every attempt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationRef {
    pub checkin_id: i64,
    pub alert_id: Option<i64>,
    pub user_id: i64,
    pub kind: NotificationKind,
}
