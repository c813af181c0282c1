use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertStatus, AlertType, Priority};
use crate::checkin::PinType;
use crate::resolution::CallOutcome;
use crate::store::SafetyStore;

/// Every state change in the system produces an Event.
/// Events are appended to the audit log; they are never sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    CheckinCreated {
        checkin_id: i64,
        user_id: i64,
        scheduled_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A reminder went out as part of a scheduler snooze.
    ReminderSent {
        checkin_id: i64,
        snooze_number: u8,
        delivered: bool,
        at: DateTime<Utc>,
    },
    CheckinSnoozed {
        checkin_id: i64,
        snooze_count: u8,
        /// True when the user pressed snooze, false for a missed deadline.
        by_user: bool,
        at: DateTime<Utc>,
    },
    CheckinAcknowledged {
        checkin_id: i64,
        user_id: i64,
        pin: PinType,
        at: DateTime<Utc>,
    },
    CheckinEscalated {
        checkin_id: i64,
        at: DateTime<Utc>,
    },
    AlertRaised {
        alert_id: i64,
        checkin_id: i64,
        alert_type: AlertType,
        priority: Priority,
        at: DateTime<Utc>,
    },
    AlertStatusChanged {
        alert_id: i64,
        from: AlertStatus,
        to: AlertStatus,
        moderator_id: i64,
        at: DateTime<Utc>,
    },
    CallLogged {
        call_id: i64,
        alert_id: i64,
        moderator_id: i64,
        outcome: CallOutcome,
        at: DateTime<Utc>,
    },
    CheckinResolved {
        checkin_id: i64,
        moderator_id: i64,
        alerts_closed: usize,
        at: DateTime<Utc>,
    },
    PinsConfigured {
        user_id: i64,
        rotated: bool,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Audit `action` column.
    pub fn action(&self) -> &'static str {
        match self {
            Event::CheckinCreated { .. } => "checkin_created",
            Event::ReminderSent { .. } => "reminder_sent",
            Event::CheckinSnoozed { .. } => "checkin_snoozed",
            Event::CheckinAcknowledged { .. } => "checkin_acknowledged",
            Event::CheckinEscalated { .. } => "checkin_escalated",
            Event::AlertRaised { .. } => "alert_raised",
            Event::AlertStatusChanged { .. } => "alert_status_changed",
            Event::CallLogged { .. } => "call_logged",
            Event::CheckinResolved { .. } => "checkin_resolved",
            Event::PinsConfigured { .. } => "pins_configured",
        }
    }

    /// Entity kind and id the event is about.
    pub fn entity(&self) -> (&'static str, i64) {
        match self {
            Event::CheckinCreated { checkin_id, .. }
            | Event::ReminderSent { checkin_id, .. }
            | Event::CheckinSnoozed { checkin_id, .. }
            | Event::CheckinAcknowledged { checkin_id, .. }
            | Event::CheckinEscalated { checkin_id, .. }
            | Event::CheckinResolved { checkin_id, .. } => ("checkin", *checkin_id),
            Event::AlertRaised { alert_id, .. } | Event::AlertStatusChanged { alert_id, .. } => {
                ("alert", *alert_id)
            }
            Event::CallLogged { call_id, .. } => ("call_log", *call_id),
            Event::PinsConfigured { user_id, .. } => ("user", *user_id),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::CheckinCreated { at, .. }
            | Event::ReminderSent { at, .. }
            | Event::CheckinSnoozed { at, .. }
            | Event::CheckinAcknowledged { at, .. }
            | Event::CheckinEscalated { at, .. }
            | Event::AlertRaised { at, .. }
            | Event::AlertStatusChanged { at, .. }
            | Event::CallLogged { at, .. }
            | Event::CheckinResolved { at, .. }
            | Event::PinsConfigured { at, .. } => *at,
        }
    }
}

/// Append to the audit log. A failed audit write is logged and does not
/// fail the operation that produced the event.
pub fn record(store: &dyn SafetyStore, actor_id: Option<i64>, org_id: Option<i64>, event: &Event) {
    if let Err(e) = store.append_audit(actor_id, org_id, event) {
        tracing::warn!(action = event.action(), error = %e, "audit write failed");
    }
}

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    /// Moderator or user that caused the event; `None` for the scheduler.
    pub actor_id: Option<i64>,
    pub org_id: Option<i64>,
    pub action: String,
    pub entity: String,
    pub entity_id: i64,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
