//! Notification payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertType, EscalationTarget, ManualReason};

/// Android channel for user-facing check-in prompts.
pub const CHECKIN_CHANNEL: &str = "safety_checkin_channel";
/// Android channel for moderator alerts.
pub const ADMIN_CHANNEL: &str = "admin_alerts_channel";

/// Topic every moderator device of an organisation subscribes to.
pub fn org_topic(org_id: i64) -> String {
    format!("org_{org_id}_alerts")
}

/// A push payload, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// String-only data map (FCM requires string values).
    pub data: BTreeMap<String, String>,
    pub android_channel: String,
}

impl PushMessage {
    fn new(title: impl Into<String>, body: impl Into<String>, channel: &str) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
            android_channel: channel.to_string(),
        }
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    /// Initial prompt when a check-in becomes due.
    pub fn checkin_due(checkin_id: i64, label: &str, scheduled_time: &str) -> Self {
        Self::new(
            "Safety Check-in Required",
            format!("Time for your {label} check-in"),
            CHECKIN_CHANNEL,
        )
        .with("type", "checkin_alert")
        .with("checkin_id", checkin_id)
        .with("label", label)
        .with("scheduled_time", scheduled_time)
    }

    /// Reminder sent with each snooze.
    pub fn snooze_reminder(checkin_id: i64, snooze_number: u8, remaining: u8) -> Self {
        Self::new(
            "Check-in Reminder",
            format!("Please complete your safety check-in ({remaining} snoozes remaining)"),
            CHECKIN_CHANNEL,
        )
        .with("type", "checkin_alert")
        .with("checkin_id", checkin_id)
        .with("snooze_number", snooze_number)
    }

    /// Moderator alert for a newly raised incident.
    pub fn admin_alert(alert: &Alert, user_name: &str) -> Self {
        let (title, body) = match alert.alert_type {
            AlertType::DangerPin => (
                "CRITICAL: Danger PIN Entered".to_string(),
                format!("{user_name} has entered their danger PIN - immediate action required"),
            ),
            AlertType::NoResponseAfterSnooze => (
                "No Response Alert".to_string(),
                format!("{user_name} has not responded after 3 snooze attempts"),
            ),
            AlertType::CallFailed => (
                "Call Failed".to_string(),
                format!("Moderator call to {user_name} failed"),
            ),
            AlertType::Manual {
                reason: ManualReason::CallOutcome,
            } => (
                "Moderator Alert".to_string(),
                format!("{user_name} could not confirm they are safe"),
            ),
            AlertType::Manual {
                reason: ManualReason::Escalation(target),
            } => (
                "Escalation".to_string(),
                format!(
                    "Incident for {user_name} escalated to {}",
                    match target {
                        EscalationTarget::Police => "police",
                        EscalationTarget::Family => "family",
                        EscalationTarget::Admin => "admin",
                    }
                ),
            ),
        };
        Self::new(title, body, ADMIN_CHANNEL)
            .with("type", "admin_alert")
            .with("alert_id", alert.id)
            .with("checkin_id", alert.checkin_id)
            .with("alert_type", alert.alert_type.kind_str())
            .with("priority", alert.priority.as_str())
    }
}
