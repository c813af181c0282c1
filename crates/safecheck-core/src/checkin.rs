//! Check-in records and the check-in state machine.
//!
//! ## State Transitions
//!
//! ```text
//! pending -> (acknowledged_safe | acknowledged_danger | snoozed)
//! snoozed -> (snoozed | acknowledged_safe | acknowledged_danger | escalated_no_response)
//! any non-terminal -> resolved
//! ```
//!
//! Transitions are not applied here. Each one is described by a
//! [`Transition`] listing the statuses it may start from; the store turns
//! that into a single conditional update so concurrent actors cannot both
//! win.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Snooze cap. A check-in is escalated after this many unanswered reminders.
pub const MAX_SNOOZES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinStatus {
    Pending,
    AcknowledgedSafe,
    AcknowledgedDanger,
    Snoozed,
    EscalatedNoResponse,
    Resolved,
}

impl CheckinStatus {
    pub const ALL: [CheckinStatus; 6] = [
        CheckinStatus::Pending,
        CheckinStatus::AcknowledgedSafe,
        CheckinStatus::AcknowledgedDanger,
        CheckinStatus::Snoozed,
        CheckinStatus::EscalatedNoResponse,
        CheckinStatus::Resolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckinStatus::Pending => "pending",
            CheckinStatus::AcknowledgedSafe => "acknowledged_safe",
            CheckinStatus::AcknowledgedDanger => "acknowledged_danger",
            CheckinStatus::Snoozed => "snoozed",
            CheckinStatus::EscalatedNoResponse => "escalated_no_response",
            CheckinStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "status",
                value: s.to_string(),
            })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CheckinStatus::Resolved)
    }

    /// Still waiting on the user (reminders may fire).
    pub fn awaits_response(self) -> bool {
        matches!(self, CheckinStatus::Pending | CheckinStatus::Snoozed)
    }
}

impl std::fmt::Display for CheckinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which PIN class produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinType {
    Safe,
    Danger,
}

impl PinType {
    pub fn as_str(self) -> &'static str {
        match self {
            PinType::Safe => "safe",
            PinType::Danger => "danger",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "safe" => Ok(PinType::Safe),
            "danger" => Ok(PinType::Danger),
            other => Err(ValidationError::InvalidValue {
                field: "pin_type_used",
                value: other.to_string(),
            }),
        }
    }
}

/// One scheduled safety confirmation for one user on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub timing_id: i64,
    /// Time of day as configured on the timing (`HH:MM[:SS]`).
    pub scheduled_time: String,
    pub checkin_date: NaiveDate,
    /// UTC instant the check-in became due.
    pub scheduled_at: DateTime<Utc>,
    pub status: CheckinStatus,
    pub snooze_count: u8,
    pub last_snooze_at: Option<DateTime<Utc>>,
    pub response_at: Option<DateTime<Utc>>,
    pub pin_type_used: Option<PinType>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl CheckIn {
    pub fn remaining_snoozes(&self) -> u8 {
        MAX_SNOOZES.saturating_sub(self.snooze_count)
    }

    /// The instant the current reminder window opened.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.last_snooze_at.unwrap_or(self.scheduled_at)
    }
}

/// Fields needed to create a check-in; status always starts at `pending`.
#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub user_id: i64,
    pub org_id: i64,
    pub timing_id: i64,
    pub scheduled_time: String,
    pub checkin_date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
}

/// A conditional status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Correct PIN entered by the user.
    Acknowledge { pin: PinType, at: DateTime<Utc> },
    /// Reminder sent without a response. Applies only while the count still
    /// equals `expected_count`, which makes late ticks no-ops.
    Snooze {
        expected_count: u8,
        at: DateTime<Utc>,
    },
    /// Snooze cap exhausted and the last window elapsed.
    EscalateNoResponse { at: DateTime<Utc> },
    /// Moderator evidence of danger (call outcome or manual escalation).
    MarkDanger { at: DateTime<Utc> },
}

impl Transition {
    /// Statuses this transition may start from.
    pub fn allowed_from(&self) -> &'static [CheckinStatus] {
        use CheckinStatus::*;
        match self {
            Transition::Acknowledge { .. } | Transition::Snooze { .. } => &[Pending, Snoozed],
            Transition::EscalateNoResponse { .. } => &[Snoozed],
            Transition::MarkDanger { .. } => &[
                Pending,
                AcknowledgedSafe,
                AcknowledgedDanger,
                Snoozed,
                EscalatedNoResponse,
            ],
        }
    }

    pub fn target(&self) -> CheckinStatus {
        match self {
            Transition::Acknowledge {
                pin: PinType::Safe, ..
            } => CheckinStatus::AcknowledgedSafe,
            Transition::Acknowledge {
                pin: PinType::Danger,
                ..
            }
            | Transition::MarkDanger { .. } => CheckinStatus::AcknowledgedDanger,
            Transition::Snooze { .. } => CheckinStatus::Snoozed,
            Transition::EscalateNoResponse { .. } => CheckinStatus::EscalatedNoResponse,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Acknowledge { .. } => "verify",
            Transition::Snooze { .. } => "snooze",
            Transition::EscalateNoResponse { .. } => "escalate",
            Transition::MarkDanger { .. } => "mark danger",
        }
    }

    /// Pure check used by callers before touching the store and by tests.
    pub fn permits(&self, checkin: &CheckIn) -> bool {
        if !self.allowed_from().contains(&checkin.status) {
            return false;
        }
        match self {
            Transition::Snooze { expected_count, .. } => {
                checkin.snooze_count == *expected_count && *expected_count < MAX_SNOOZES
            }
            Transition::EscalateNoResponse { .. } => checkin.snooze_count >= MAX_SNOOZES,
            _ => true,
        }
    }

    /// Apply to an in-memory copy. Used to build the post-transition view
    /// without re-reading the row.
    pub fn apply(&self, checkin: &mut CheckIn) {
        checkin.status = self.target();
        match self {
            Transition::Acknowledge { pin, at } => {
                checkin.pin_type_used = Some(*pin);
                checkin.response_at = Some(*at);
            }
            Transition::Snooze { at, .. } => {
                checkin.snooze_count = checkin.snooze_count.saturating_add(1).min(MAX_SNOOZES);
                checkin.last_snooze_at = Some(*at);
            }
            Transition::EscalateNoResponse { .. } => {}
            Transition::MarkDanger { .. } => {
                checkin.pin_type_used = Some(PinType::Danger);
            }
        }
    }
}

/// Status as shown to the monitored user.
///
/// Answering with either PIN reads as `completed`, including after a
/// moderator resolves the incident, so the phone never tells a safe
/// answer from a danger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobileStatus {
    Pending,
    Snoozed,
    Completed,
    Missed,
    Resolved,
}

impl MobileStatus {
    pub fn of(checkin: &CheckIn) -> Self {
        match checkin.status {
            CheckinStatus::Pending => MobileStatus::Pending,
            CheckinStatus::Snoozed => MobileStatus::Snoozed,
            _ if checkin.response_at.is_some() => MobileStatus::Completed,
            CheckinStatus::Resolved => MobileStatus::Resolved,
            // Safe acknowledgements always carry a response time.
            CheckinStatus::AcknowledgedSafe => MobileStatus::Completed,
            CheckinStatus::AcknowledgedDanger | CheckinStatus::EscalatedNoResponse => {
                MobileStatus::Missed
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MobileStatus::Pending => "pending",
            MobileStatus::Snoozed => "snoozed",
            MobileStatus::Completed => "completed",
            MobileStatus::Missed => "missed",
            MobileStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for MobileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check-in as the monitored user sees it. Carries neither the stored
/// status nor the PIN type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileCheckIn {
    pub id: i64,
    pub timing_id: i64,
    pub scheduled_time: String,
    pub checkin_date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
    pub status: MobileStatus,
    pub snooze_count: u8,
    pub remaining_snoozes: u8,
    pub response_at: Option<DateTime<Utc>>,
}

impl From<&CheckIn> for MobileCheckIn {
    fn from(c: &CheckIn) -> Self {
        Self {
            id: c.id,
            timing_id: c.timing_id,
            scheduled_time: c.scheduled_time.clone(),
            checkin_date: c.checkin_date,
            scheduled_at: c.scheduled_at,
            status: MobileStatus::of(c),
            snooze_count: c.snooze_count,
            remaining_snoozes: c.remaining_snoozes(),
            response_at: c.response_at,
        }
    }
}

/// Per-day counts for a user's check-ins, by [`MobileStatus`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub missed: usize,
    pub resolved: usize,
}

impl DayStats {
    pub fn from_checkins(checkins: &[MobileCheckIn]) -> Self {
        let mut stats = DayStats {
            total: checkins.len(),
            ..Default::default()
        };
        for c in checkins {
            match c.status {
                MobileStatus::Pending | MobileStatus::Snoozed => stats.pending += 1,
                MobileStatus::Completed => stats.completed += 1,
                MobileStatus::Missed => stats.missed += 1,
                MobileStatus::Resolved => stats.resolved += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
pub(crate) fn sample_checkin(status: CheckinStatus, snooze_count: u8) -> CheckIn {
    let now = Utc::now();
    CheckIn {
        id: 1,
        user_id: 10,
        org_id: 100,
        timing_id: 7,
        scheduled_time: "09:00".to_string(),
        checkin_date: now.date_naive(),
        scheduled_at: now,
        status,
        snooze_count,
        last_snooze_at: None,
        response_at: None,
        pin_type_used: None,
        resolved_at: None,
        resolved_by: None,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn status_strings_roundtrip() {
        for status in CheckinStatus::ALL {
            assert_eq!(CheckinStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(CheckinStatus::parse("completed").is_err());
    }

    #[test]
    fn only_resolved_is_terminal() {
        for status in CheckinStatus::ALL {
            assert_eq!(status.is_terminal(), status == CheckinStatus::Resolved);
        }
    }

    #[test]
    fn acknowledge_rejected_after_resolution() {
        let c = sample_checkin(CheckinStatus::Resolved, 0);
        let t = Transition::Acknowledge {
            pin: PinType::Safe,
            at: Utc::now(),
        };
        assert!(!t.permits(&c));
    }

    #[test]
    fn acknowledge_allowed_from_snoozed() {
        let c = sample_checkin(CheckinStatus::Snoozed, 2);
        let t = Transition::Acknowledge {
            pin: PinType::Danger,
            at: Utc::now(),
        };
        assert!(t.permits(&c));
        assert_eq!(t.target(), CheckinStatus::AcknowledgedDanger);
    }

    #[test]
    fn snooze_requires_expected_count_below_cap() {
        let at = Utc::now();
        let c = sample_checkin(CheckinStatus::Snoozed, 2);
        assert!(Transition::Snooze { expected_count: 2, at }.permits(&c));
        assert!(!Transition::Snooze { expected_count: 1, at }.permits(&c));

        let capped = sample_checkin(CheckinStatus::Snoozed, 3);
        assert!(!Transition::Snooze { expected_count: 3, at }.permits(&capped));
    }

    #[test]
    fn escalation_needs_exhausted_snoozes() {
        let at = Utc::now();
        assert!(!Transition::EscalateNoResponse { at }
            .permits(&sample_checkin(CheckinStatus::Snoozed, 2)));
        assert!(Transition::EscalateNoResponse { at }
            .permits(&sample_checkin(CheckinStatus::Snoozed, 3)));
        assert!(!Transition::EscalateNoResponse { at }
            .permits(&sample_checkin(CheckinStatus::Pending, 0)));
    }

    #[test]
    fn mark_danger_sets_pin_type_without_response_time() {
        let mut c = sample_checkin(CheckinStatus::EscalatedNoResponse, 3);
        let t = Transition::MarkDanger { at: Utc::now() };
        assert!(t.permits(&c));
        t.apply(&mut c);
        assert_eq!(c.status, CheckinStatus::AcknowledgedDanger);
        assert_eq!(c.pin_type_used, Some(PinType::Danger));
        assert!(c.response_at.is_none());
    }

    #[test]
    fn day_stats_buckets() {
        let checkins: Vec<MobileCheckIn> = [
            sample_checkin(CheckinStatus::Pending, 0),
            sample_checkin(CheckinStatus::Snoozed, 1),
            sample_checkin(CheckinStatus::AcknowledgedSafe, 0),
            sample_checkin(CheckinStatus::EscalatedNoResponse, 3),
        ]
        .iter()
        .map(MobileCheckIn::from)
        .collect();
        let stats = DayStats::from_checkins(&checkins);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.missed, 1);
    }

    #[test]
    fn pin_answers_read_as_completed() {
        let answered = |status, pin| {
            let mut c = sample_checkin(status, 1);
            c.pin_type_used = Some(pin);
            c.response_at = Some(Utc::now());
            c
        };
        let safe = answered(CheckinStatus::AcknowledgedSafe, PinType::Safe);
        let danger = answered(CheckinStatus::AcknowledgedDanger, PinType::Danger);
        let resolved = answered(CheckinStatus::Resolved, PinType::Danger);
        for c in [&safe, &danger, &resolved] {
            assert_eq!(MobileStatus::of(c), MobileStatus::Completed);
        }

        // Moderator-marked danger without an answer.
        let marked = sample_checkin(CheckinStatus::AcknowledgedDanger, 3);
        assert_eq!(MobileStatus::of(&marked), MobileStatus::Missed);
        assert_eq!(
            MobileStatus::of(&sample_checkin(CheckinStatus::Resolved, 3)),
            MobileStatus::Resolved
        );
    }

    proptest! {
        #[test]
        fn snooze_count_never_exceeds_cap(steps in proptest::collection::vec(0u8..5, 0..20)) {
            let mut c = sample_checkin(CheckinStatus::Pending, 0);
            let mut previous = c.snooze_count;
            for expected in steps {
                let t = Transition::Snooze { expected_count: expected, at: Utc::now() };
                if t.permits(&c) {
                    t.apply(&mut c);
                }
                prop_assert!(c.snooze_count <= MAX_SNOOZES);
                prop_assert!(c.snooze_count >= previous);
                previous = c.snooze_count;
            }
        }
    }
}
