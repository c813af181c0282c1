//! Alerts: actionable incidents derived from a check-in.
//!
//! - [`AlertType`] / [`Priority`] and the priority rule table
//! - [`AlertStatus`] and its transitions
//! - [`AlertEngine`]: raising alerts and handing them to the dispatcher

mod engine;

pub use engine::{AlertEngine, RaiseContext, RaisedAlert};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkin::MAX_SNOOZES;
use crate::error::ValidationError;

/// Who a moderator hands an incident to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTarget {
    Police,
    Family,
    Admin,
}

impl EscalationTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationTarget::Police => "police",
            EscalationTarget::Family => "family",
            EscalationTarget::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "police" => Ok(EscalationTarget::Police),
            "family" => Ok(EscalationTarget::Family),
            "admin" => Ok(EscalationTarget::Admin),
            other => Err(ValidationError::InvalidValue {
                field: "escalation_target",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a moderator raised a manual alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", content = "target", rename_all = "snake_case")]
pub enum ManualReason {
    /// Call outcome indicated danger (not safe, or not attended).
    CallOutcome,
    /// Explicit hand-off to an outside party.
    Escalation(EscalationTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertType {
    DangerPin,
    NoResponseAfterSnooze,
    CallFailed,
    Manual { reason: ManualReason },
}

impl AlertType {
    /// Column value for `alert_type`.
    pub fn kind_str(self) -> &'static str {
        match self {
            AlertType::DangerPin => "danger_pin",
            AlertType::NoResponseAfterSnooze => "no_response_after_snooze",
            AlertType::CallFailed => "call_failed",
            AlertType::Manual { .. } => "manual",
        }
    }

    /// Column value for `escalation_target` (manual escalations only).
    pub fn target_str(self) -> Option<&'static str> {
        match self {
            AlertType::Manual {
                reason: ManualReason::Escalation(target),
            } => Some(target.as_str()),
            _ => None,
        }
    }

    /// Rebuild from the two stored columns.
    pub fn from_columns(kind: &str, target: Option<&str>) -> Result<Self, ValidationError> {
        match kind {
            "danger_pin" => Ok(AlertType::DangerPin),
            "no_response_after_snooze" => Ok(AlertType::NoResponseAfterSnooze),
            "call_failed" => Ok(AlertType::CallFailed),
            "manual" => {
                let reason = match target {
                    Some(t) => ManualReason::Escalation(EscalationTarget::parse(t)?),
                    None => ManualReason::CallOutcome,
                };
                Ok(AlertType::Manual { reason })
            }
            other => Err(ValidationError::InvalidValue {
                field: "alert_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(ValidationError::InvalidValue {
                field: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// Priority rule table.
///
/// Depends only on the alert type and the check-in's snooze count.
pub fn priority_for(alert_type: AlertType, snooze_count: u8) -> Priority {
    let exhausted = snooze_count >= MAX_SNOOZES;
    match alert_type {
        AlertType::DangerPin => Priority::Critical,
        AlertType::Manual {
            reason: ManualReason::Escalation(EscalationTarget::Police),
        } => Priority::Critical,
        AlertType::Manual { .. } => Priority::High,
        AlertType::NoResponseAfterSnooze | AlertType::CallFailed if exhausted => Priority::High,
        AlertType::NoResponseAfterSnooze | AlertType::CallFailed => Priority::Medium,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    InProgress,
    Resolved,
    FalseAlarm,
}

impl AlertStatus {
    pub const OPEN: [AlertStatus; 3] = [
        AlertStatus::Pending,
        AlertStatus::Acknowledged,
        AlertStatus::InProgress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::InProgress => "in_progress",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalseAlarm => "false_alarm",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "pending" => Ok(AlertStatus::Pending),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "in_progress" => Ok(AlertStatus::InProgress),
            "resolved" => Ok(AlertStatus::Resolved),
            "false_alarm" => Ok(AlertStatus::FalseAlarm),
            other => Err(ValidationError::InvalidValue {
                field: "alert_status",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalseAlarm)
    }

    /// Statuses an alert may move to `self` from.
    pub fn allowed_from(self) -> &'static [AlertStatus] {
        use AlertStatus::*;
        match self {
            Pending => &[],
            Acknowledged => &[Pending],
            InProgress => &[Pending, Acknowledged],
            Resolved | FalseAlarm => &[Pending, Acknowledged, InProgress],
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub checkin_id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub alert_type: AlertType,
    pub priority: Priority,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i64>,
    pub resolution_notes: Option<String>,
}

/// Fields for inserting a new alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub checkin_id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub alert_type: AlertType,
    pub priority: Priority,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

/// Dashboard ordering: critical first, then newest first.
pub fn sort_for_dashboard(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    });
}
