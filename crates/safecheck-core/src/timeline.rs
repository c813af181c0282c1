//! Dashboard read models: the active alert list, the incident timeline and
//! the resolved-incident history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::{sort_for_dashboard, Alert, AlertStatus, AlertType, Priority};
use crate::checkin::{CheckIn, PinType, MAX_SNOOZES};
use crate::error::{CoreError, Result, ValidationError};
use crate::notify::DeliveryStatus;
use crate::resolution::{CallOutcome, Moderator};
use crate::store::SafetyStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineKind {
    CheckinDue {
        scheduled_time: String,
    },
    Notification {
        channel: String,
        kind: String,
        status: DeliveryStatus,
        error: Option<String>,
    },
    Snoozed {
        snooze_number: u8,
        delivered: bool,
    },
    Responded {
        pin: PinType,
    },
    AlertRaised {
        alert_id: i64,
        alert_type: AlertType,
        priority: Priority,
    },
    Call {
        call_id: i64,
        alert_id: i64,
        admin_id: i64,
        outcome: CallOutcome,
        duration_secs: Option<u32>,
        notes: Option<String>,
    },
    AlertClosed {
        alert_id: i64,
        status: AlertStatus,
        by: Option<i64>,
    },
    Resolved {
        by: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TimelineKind,
}

/// Everything that happened to one check-in, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentTimeline {
    pub checkin: CheckIn,
    pub alerts: Vec<Alert>,
    pub entries: Vec<TimelineEntry>,
}

/// Most entries returned by [`resolved_incidents`].
pub const RESOLVED_HISTORY_LIMIT: usize = 100;

/// How a resolved check-in had gone before a moderator closed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    DangerPin,
    NoResponse,
    LateResponse,
    OnTime,
}

impl ResolutionType {
    pub fn of(checkin: &CheckIn) -> Self {
        if checkin.pin_type_used == Some(PinType::Danger) {
            ResolutionType::DangerPin
        } else if checkin.snooze_count >= MAX_SNOOZES {
            ResolutionType::NoResponse
        } else if checkin.snooze_count > 0 {
            ResolutionType::LateResponse
        } else {
            ResolutionType::OnTime
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResolutionType::DangerPin => "Danger Pin",
            ResolutionType::NoResponse => "No Response",
            ResolutionType::LateResponse => "Late Response",
            ResolutionType::OnTime => "On Time",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedIncident {
    pub checkin: CheckIn,
    pub full_name: Option<String>,
    pub resolution_type: ResolutionType,
}

/// Open alerts of the moderator's organisation, critical first, newest first.
pub fn active_alerts(store: &dyn SafetyStore, moderator: Moderator) -> Result<Vec<Alert>> {
    let mut alerts = store.open_alerts_for_org(moderator.org_id)?;
    sort_for_dashboard(&mut alerts);
    Ok(alerts)
}

/// Merge check-in, notification, snooze, alert and call records of the
/// incident behind `alert_id` into one chronological list.
pub fn alert_timeline(
    store: &dyn SafetyStore,
    moderator: Moderator,
    alert_id: i64,
) -> Result<IncidentTimeline> {
    let alert = store.get_alert(alert_id)?.ok_or(CoreError::NotFound {
        entity: "alert",
        id: alert_id,
    })?;
    moderator.authorize("alert", alert.id, alert.org_id)?;
    let checkin = store
        .get_checkin(alert.checkin_id)?
        .ok_or(CoreError::NotFound {
            entity: "checkin",
            id: alert.checkin_id,
        })?;

    let alerts = store.alerts_for_checkin(checkin.id)?;
    let mut entries = vec![TimelineEntry {
        at: checkin.scheduled_at,
        kind: TimelineKind::CheckinDue {
            scheduled_time: checkin.scheduled_time.clone(),
        },
    }];

    for attempt in store.attempts_for_checkin(checkin.id)? {
        entries.push(TimelineEntry {
            at: attempt.sent_at,
            kind: TimelineKind::Notification {
                channel: attempt.channel,
                kind: attempt.kind.as_string(),
                status: attempt.status,
                error: attempt.error,
            },
        });
    }
    for snooze in store.snooze_logs(checkin.id)? {
        entries.push(TimelineEntry {
            at: snooze.sent_at,
            kind: TimelineKind::Snoozed {
                snooze_number: snooze.snooze_number,
                delivered: snooze.notification_delivered,
            },
        });
    }
    if let (Some(at), Some(pin)) = (checkin.response_at, checkin.pin_type_used) {
        entries.push(TimelineEntry {
            at,
            kind: TimelineKind::Responded { pin },
        });
    }
    for a in &alerts {
        entries.push(TimelineEntry {
            at: a.created_at,
            kind: TimelineKind::AlertRaised {
                alert_id: a.id,
                alert_type: a.alert_type,
                priority: a.priority,
            },
        });
        if let (true, Some(at)) = (a.status.is_terminal(), a.resolved_at) {
            entries.push(TimelineEntry {
                at,
                kind: TimelineKind::AlertClosed {
                    alert_id: a.id,
                    status: a.status,
                    by: a.resolved_by,
                },
            });
        }
    }
    for call in store.call_logs_for_checkin(checkin.id)? {
        entries.push(TimelineEntry {
            at: call.called_at,
            kind: TimelineKind::Call {
                call_id: call.id,
                alert_id: call.alert_id,
                admin_id: call.admin_id,
                outcome: call.outcome,
                duration_secs: call.duration_secs,
                notes: call.notes,
            },
        });
    }
    if let Some(at) = checkin.resolved_at {
        entries.push(TimelineEntry {
            at,
            kind: TimelineKind::Resolved {
                by: checkin.resolved_by,
            },
        });
    }

    // stable: equal timestamps keep the insertion order above
    entries.sort_by_key(|e| e.at);
    Ok(IncidentTimeline {
        checkin,
        alerts,
        entries,
    })
}

/// Resolved check-ins of the moderator's organisation, most recently
/// resolved first, optionally limited to a `resolved_at` range.
pub fn resolved_incidents(
    store: &dyn SafetyStore,
    moderator: Moderator,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<ResolvedIncident>> {
    if let Some((from, to)) = range {
        if from > to {
            return Err(ValidationError::InvalidValue {
                field: "range",
                value: format!("{from} > {to}"),
            }
            .into());
        }
    }
    let checkins =
        store.resolved_checkins_for_org(moderator.org_id, range, RESOLVED_HISTORY_LIMIT)?;
    let mut names: HashMap<i64, Option<String>> = HashMap::new();
    let mut incidents = Vec::with_capacity(checkins.len());
    for checkin in checkins {
        let full_name = match names.get(&checkin.user_id) {
            Some(name) => name.clone(),
            None => {
                let name = store.get_profile(checkin.user_id)?.map(|p| p.full_name);
                names.insert(checkin.user_id, name.clone());
                name
            }
        };
        incidents.push(ResolvedIncident {
            resolution_type: ResolutionType::of(&checkin),
            full_name,
            checkin,
        });
    }
    Ok(incidents)
}
