//! Data-access contract.
//!
//! The engine reads and writes persistence only through [`SafetyStore`].
//! Status changes are compare-and-set: they return `false` when the row was
//! no longer in a state the change may start from, and the caller treats
//! that as losing a race.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::alert::{Alert, AlertStatus, NewAlert};
use crate::checkin::{CheckIn, NewCheckIn, Transition};
use crate::credential::{PinHashes, UserProfile};
use crate::error::Result;
use crate::events::{AuditEntry, Event};
use crate::notify::{Device, NewNotificationAttempt, NotificationAttempt};
use crate::resolution::{CallLog, NewCallLog};
use crate::scheduler::SnoozeLog;
use crate::timing::{NewTiming, SafetyTiming};

/// Result of a resolve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// This call closed the check-in and `alerts_closed` open alerts.
    Resolved { alerts_closed: usize },
    /// Someone else resolved it first; nothing was written.
    AlreadyResolved,
}

/// Resolution details written with the check-in.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    pub moderator_id: i64,
    pub at: DateTime<Utc>,
    pub notes: Option<&'a str>,
}

pub trait SafetyStore: Send + Sync {
    // -- check-ins --

    /// Insert unless a check-in already exists for (timing, date).
    /// Returns the new row, or `None` if it already existed.
    fn insert_checkin(&self, new: &NewCheckIn, created_at: DateTime<Utc>)
        -> Result<Option<CheckIn>>;

    fn get_checkin(&self, id: i64) -> Result<Option<CheckIn>>;

    /// Conditional status change. `true` if this call applied it.
    fn apply_transition(&self, id: i64, transition: &Transition) -> Result<bool>;

    /// Apply `transition` and store `alert` in one transaction. `None` if the
    /// transition lost its race; nothing is written then. Danger-PIN alerts
    /// follow the same open-alert guard as [`insert_alert_unless_open`].
    ///
    /// [`insert_alert_unless_open`]: SafetyStore::insert_alert_unless_open
    fn transition_and_raise(
        &self,
        id: i64,
        transition: &Transition,
        alert: &NewAlert,
    ) -> Result<Option<(Alert, bool)>>;

    /// Close the check-in and every open alert in one transaction.
    fn resolve_checkin(&self, id: i64, resolution: Resolution<'_>) -> Result<ResolveOutcome>;

    fn checkins_for_user_on(&self, user_id: i64, date: NaiveDate) -> Result<Vec<CheckIn>>;

    /// Every check-in still in `pending` or `snoozed`.
    fn checkins_awaiting_response(&self) -> Result<Vec<CheckIn>>;

    /// Resolved check-ins of an organisation, most recently resolved first,
    /// optionally with `resolved_at` inside `range` (both ends inclusive).
    fn resolved_checkins_for_org(
        &self,
        org_id: i64,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<CheckIn>>;

    // -- alerts --

    fn insert_alert(&self, new: &NewAlert) -> Result<Alert>;

    /// Insert an alert. A danger-PIN alert is not duplicated while one is
    /// open for the check-in. Returns the alert and whether this call
    /// created it.
    fn insert_alert_unless_open(&self, new: &NewAlert) -> Result<(Alert, bool)>;

    fn get_alert(&self, id: i64) -> Result<Option<Alert>>;

    fn alerts_for_checkin(&self, checkin_id: i64) -> Result<Vec<Alert>>;

    /// Non-terminal alerts of an organisation, unordered.
    fn open_alerts_for_org(&self, org_id: i64) -> Result<Vec<Alert>>;

    /// Conditional alert status change from any of `to.allowed_from()`.
    fn update_alert_status(
        &self,
        id: i64,
        to: AlertStatus,
        resolution: Resolution<'_>,
    ) -> Result<bool>;

    // -- call logs --

    fn insert_call_log(&self, new: &NewCallLog) -> Result<CallLog>;

    /// Calls for every alert of the check-in, oldest first.
    fn call_logs_for_checkin(&self, checkin_id: i64) -> Result<Vec<CallLog>>;

    // -- notification attempts --

    fn record_attempt(&self, attempt: &NewNotificationAttempt) -> Result<i64>;

    fn attempts_for_checkin(&self, checkin_id: i64) -> Result<Vec<NotificationAttempt>>;

    // -- devices --

    /// Insert or re-point by token; reactivates the token.
    fn upsert_device(&self, device: &Device) -> Result<()>;

    fn active_devices(&self, user_id: i64) -> Result<Vec<Device>>;

    /// `true` if an active device with this token existed.
    fn deactivate_device(&self, token: &str) -> Result<bool>;

    // -- timings --

    fn insert_timing(&self, new: &NewTiming) -> Result<SafetyTiming>;

    fn get_timing(&self, id: i64) -> Result<Option<SafetyTiming>>;

    fn timings_for_user(&self, user_id: i64) -> Result<Vec<SafetyTiming>>;

    fn active_timings(&self) -> Result<Vec<SafetyTiming>>;

    fn set_timing_active(&self, id: i64, active: bool) -> Result<bool>;

    // -- profiles --

    /// Create or rename a profile. Existing PIN hashes are kept.
    fn upsert_profile(&self, user_id: i64, org_id: i64, full_name: &str) -> Result<()>;

    fn get_profile(&self, user_id: i64) -> Result<Option<UserProfile>>;

    /// Replace both hashes. `false` if the profile does not exist.
    fn set_pin_hashes(&self, user_id: i64, hashes: &PinHashes) -> Result<bool>;

    // -- snooze log --

    fn insert_snooze_log(&self, log: &SnoozeLog) -> Result<()>;

    fn snooze_logs(&self, checkin_id: i64) -> Result<Vec<SnoozeLog>>;

    // -- audit --

    fn append_audit(&self, actor_id: Option<i64>, org_id: Option<i64>, event: &Event)
        -> Result<()>;

    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}
