//! SQLite implementation of [`SafetyStore`].
//!
//! One connection behind a mutex. Every multi-row change runs in a
//! transaction, and every status change is a conditional `UPDATE` whose
//! affected-row count decides whether the caller won.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::migrations;
use crate::alert::{Alert, AlertStatus, AlertType, NewAlert, Priority};
use crate::checkin::{CheckIn, CheckinStatus, NewCheckIn, PinType, Transition, MAX_SNOOZES};
use crate::credential::{PinHashes, UserProfile};
use crate::error::{DatabaseError, Result};
use crate::events::{AuditEntry, Event};
use crate::notify::{
    DeliveryStatus, Device, NewNotificationAttempt, NotificationAttempt, NotificationKind,
    Platform,
};
use crate::resolution::{CallLog, CallOutcome, NewCallLog};
use crate::scheduler::SnoozeLog;
use crate::store::{Resolution, ResolveOutcome, SafetyStore};
use crate::timing::{ActiveDays, NewTiming, SafetyTiming};

const CHECKIN_COLUMNS: &str = "id, user_id, org_id, timing_id, scheduled_time, checkin_date,
     scheduled_at, status, snooze_count, last_snooze_at, response_at, pin_type_used,
     resolved_at, resolved_by, created_at";

const ALERT_COLUMNS: &str = "id, checkin_id, user_id, org_id, alert_type, escalation_target,
     priority, status, created_at, resolved_at, resolved_by, resolution_notes";

const TIMING_COLUMNS: &str = "id, user_id, org_id, label, time, active_days, is_active";

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

/// Quoted SQL list of status literals. Inputs are enum constants only.
fn status_list<'a>(statuses: impl IntoIterator<Item = &'a str>) -> String {
    statuses
        .into_iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn checkin_from_row(row: &Row<'_>) -> rusqlite::Result<CheckIn> {
    let date_raw: String = row.get(5)?;
    let status_raw: String = row.get(7)?;
    let pin_raw: Option<String> = row.get(11)?;
    Ok(CheckIn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        org_id: row.get(2)?,
        timing_id: row.get(3)?,
        scheduled_time: row.get(4)?,
        checkin_date: NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
            .map_err(|e| conversion(5, e))?,
        scheduled_at: get_ts(row, 6)?,
        status: CheckinStatus::parse(&status_raw).map_err(|e| conversion(7, e))?,
        snooze_count: row.get::<_, u8>(8)?.min(MAX_SNOOZES),
        last_snooze_at: get_opt_ts(row, 9)?,
        response_at: get_opt_ts(row, 10)?,
        pin_type_used: pin_raw
            .map(|p| PinType::parse(&p).map_err(|e| conversion(11, e)))
            .transpose()?,
        resolved_at: get_opt_ts(row, 12)?,
        resolved_by: row.get(13)?,
        created_at: get_ts(row, 14)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let kind: String = row.get(4)?;
    let target: Option<String> = row.get(5)?;
    let priority: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(Alert {
        id: row.get(0)?,
        checkin_id: row.get(1)?,
        user_id: row.get(2)?,
        org_id: row.get(3)?,
        alert_type: AlertType::from_columns(&kind, target.as_deref())
            .map_err(|e| conversion(4, e))?,
        priority: Priority::parse(&priority).map_err(|e| conversion(6, e))?,
        status: AlertStatus::parse(&status).map_err(|e| conversion(7, e))?,
        created_at: get_ts(row, 8)?,
        resolved_at: get_opt_ts(row, 9)?,
        resolved_by: row.get(10)?,
        resolution_notes: row.get(11)?,
    })
}

fn timing_from_row(row: &Row<'_>) -> rusqlite::Result<SafetyTiming> {
    let days: String = row.get(5)?;
    Ok(SafetyTiming {
        id: row.get(0)?,
        user_id: row.get(1)?,
        org_id: row.get(2)?,
        label: row.get(3)?,
        time: row.get(4)?,
        active_days: ActiveDays::from_json(&days).map_err(|e| conversion(5, e))?,
        is_active: row.get(6)?,
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let platform: String = row.get(2)?;
    Ok(Device {
        token: row.get(0)?,
        user_id: row.get(1)?,
        platform: Platform::parse(&platform).map_err(|e| conversion(2, e))?,
        name: row.get(3)?,
        is_active: row.get(4)?,
        last_used_at: get_ts(row, 5)?,
    })
}

fn call_log_from_row(row: &Row<'_>) -> rusqlite::Result<CallLog> {
    let outcome: String = row.get(5)?;
    Ok(CallLog {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        admin_id: row.get(2)?,
        user_id: row.get(3)?,
        called_at: get_ts(row, 4)?,
        outcome: CallOutcome::parse(&outcome).map_err(|e| conversion(5, e))?,
        duration_secs: row.get(6)?,
        notes: row.get(7)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationAttempt> {
    let kind: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(NotificationAttempt {
        id: row.get(0)?,
        checkin_id: row.get(1)?,
        alert_id: row.get(2)?,
        user_id: row.get(3)?,
        channel: row.get(4)?,
        kind: NotificationKind::parse(&kind).map_err(|e| conversion(5, e))?,
        sent_at: get_ts(row, 6)?,
        status: DeliveryStatus::parse(&status).map_err(|e| conversion(7, e))?,
        error: row.get(8)?,
    })
}

fn query_checkin(conn: &Connection, id: i64) -> rusqlite::Result<Option<CheckIn>> {
    conn.query_row(
        &format!("SELECT {CHECKIN_COLUMNS} FROM checkins WHERE id = ?1"),
        params![id],
        checkin_from_row,
    )
    .optional()
}

fn query_alert(conn: &Connection, id: i64) -> rusqlite::Result<Option<Alert>> {
    conn.query_row(
        &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
        params![id],
        alert_from_row,
    )
    .optional()
}

fn insert_alert_row(conn: &Connection, new: &NewAlert) -> rusqlite::Result<Alert> {
    conn.execute(
        "INSERT INTO alerts (checkin_id, user_id, org_id, alert_type, escalation_target,
                             priority, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.checkin_id,
            new.user_id,
            new.org_id,
            new.alert_type.kind_str(),
            new.alert_type.target_str(),
            new.priority.as_str(),
            new.status.as_str(),
            ts(new.created_at),
        ],
    )?;
    let id = conn.last_insert_rowid();
    query_alert(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Conditional status update on `conn`. `true` if the row changed.
fn transition_row(conn: &Connection, id: i64, transition: &Transition) -> rusqlite::Result<bool> {
    let from = status_list(transition.allowed_from().iter().map(|s| s.as_str()));
    let target = transition.target().as_str();
    let changed = match transition {
        Transition::Acknowledge { pin, at } => conn.execute(
            &format!(
                "UPDATE checkins SET status = ?1, pin_type_used = ?2, response_at = ?3
                 WHERE id = ?4 AND status IN ({from})"
            ),
            params![target, pin.as_str(), ts(*at), id],
        )?,
        Transition::Snooze { expected_count, at } => conn.execute(
            &format!(
                "UPDATE checkins SET status = ?1, snooze_count = snooze_count + 1,
                                     last_snooze_at = ?2
                 WHERE id = ?3 AND status IN ({from})
                   AND snooze_count = ?4 AND snooze_count < ?5"
            ),
            params![target, ts(*at), id, expected_count, MAX_SNOOZES],
        )?,
        Transition::EscalateNoResponse { .. } => conn.execute(
            &format!(
                "UPDATE checkins SET status = ?1
                 WHERE id = ?2 AND status IN ({from}) AND snooze_count >= ?3"
            ),
            params![target, id, MAX_SNOOZES],
        )?,
        Transition::MarkDanger { .. } => conn.execute(
            &format!(
                "UPDATE checkins SET status = ?1, pin_type_used = 'danger'
                 WHERE id = ?2 AND status IN ({from})"
            ),
            params![target, id],
        )?,
    };
    Ok(changed == 1)
}

/// Insert an alert. A danger-PIN alert is not duplicated while one is still
/// open for the check-in; the open one is returned with `false`.
fn insert_alert_guarded(conn: &Connection, new: &NewAlert) -> rusqlite::Result<(Alert, bool)> {
    if new.alert_type == AlertType::DangerPin {
        let open = status_list(AlertStatus::OPEN.iter().map(|s| s.as_str()));
        let existing: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT id FROM alerts
                     WHERE checkin_id = ?1 AND alert_type = ?2 AND status IN ({open})
                     ORDER BY id LIMIT 1"
                ),
                params![new.checkin_id, new.alert_type.kind_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            let alert = query_alert(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            return Ok((alert, false));
        }
    }
    Ok((insert_alert_row(conn, new)?, true))
}

/// SQLite-backed store.
pub struct SafetyDb {
    conn: Mutex<Connection>,
}

impl SafetyDb {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests, dry runs).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::Poisoned.into())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        Ok(migrations::get_schema_version(&conn)?)
    }
}

impl SafetyStore for SafetyDb {
    fn insert_checkin(
        &self,
        new: &NewCheckIn,
        created_at: DateTime<Utc>,
    ) -> Result<Option<CheckIn>> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO checkins (user_id, org_id, timing_id, scheduled_time,
                                             checkin_date, scheduled_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![
                new.user_id,
                new.org_id,
                new.timing_id,
                new.scheduled_time,
                new.checkin_date.format("%Y-%m-%d").to_string(),
                ts(new.scheduled_at),
                ts(created_at),
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(query_checkin(&conn, conn.last_insert_rowid())?)
    }

    fn get_checkin(&self, id: i64) -> Result<Option<CheckIn>> {
        let conn = self.lock()?;
        Ok(query_checkin(&conn, id)?)
    }

    fn apply_transition(&self, id: i64, transition: &Transition) -> Result<bool> {
        let conn = self.lock()?;
        Ok(transition_row(&conn, id, transition)?)
    }

    fn transition_and_raise(
        &self,
        id: i64,
        transition: &Transition,
        alert: &NewAlert,
    ) -> Result<Option<(Alert, bool)>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !transition_row(&tx, id, transition)? {
            return Ok(None);
        }
        let raised = insert_alert_guarded(&tx, alert)?;
        tx.commit()?;
        Ok(Some(raised))
    }

    fn resolve_checkin(&self, id: i64, resolution: Resolution<'_>) -> Result<ResolveOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let at = ts(resolution.at);
        let won = tx.execute(
            "UPDATE checkins SET status = 'resolved', resolved_at = ?1, resolved_by = ?2
             WHERE id = ?3 AND status != 'resolved'",
            params![at, resolution.moderator_id, id],
        )?;
        if won == 0 {
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        let open = status_list(AlertStatus::OPEN.iter().map(|s| s.as_str()));
        let alerts_closed = tx.execute(
            &format!(
                "UPDATE alerts SET status = 'resolved', resolved_at = ?1, resolved_by = ?2,
                                   resolution_notes = COALESCE(?3, resolution_notes)
                 WHERE checkin_id = ?4 AND status IN ({open})"
            ),
            params![at, resolution.moderator_id, resolution.notes, id],
        )?;
        tx.commit()?;
        Ok(ResolveOutcome::Resolved { alerts_closed })
    }

    fn checkins_for_user_on(&self, user_id: i64, date: NaiveDate) -> Result<Vec<CheckIn>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECKIN_COLUMNS} FROM checkins
             WHERE user_id = ?1 AND checkin_date = ?2
             ORDER BY scheduled_at, id"
        ))?;
        let rows = stmt.query_map(
            params![user_id, date.format("%Y-%m-%d").to_string()],
            checkin_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn checkins_awaiting_response(&self) -> Result<Vec<CheckIn>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECKIN_COLUMNS} FROM checkins
             WHERE status IN ('pending', 'snoozed')
             ORDER BY id"
        ))?;
        let rows = stmt.query_map([], checkin_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn resolved_checkins_for_org(
        &self,
        org_id: i64,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<CheckIn>> {
        let conn = self.lock()?;
        let (from, to) = match range {
            Some((from, to)) => (Some(ts(from)), Some(ts(to))),
            None => (None, None),
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECKIN_COLUMNS} FROM checkins
             WHERE org_id = ?1 AND status = 'resolved'
               AND (?2 IS NULL OR resolved_at BETWEEN ?2 AND ?3)
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(params![org_id, from, to, limit as i64], checkin_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_alert(&self, new: &NewAlert) -> Result<Alert> {
        let conn = self.lock()?;
        Ok(insert_alert_row(&conn, new)?)
    }

    fn insert_alert_unless_open(&self, new: &NewAlert) -> Result<(Alert, bool)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let raised = insert_alert_guarded(&tx, new)?;
        tx.commit()?;
        Ok(raised)
    }

    fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let conn = self.lock()?;
        Ok(query_alert(&conn, id)?)
    }

    fn alerts_for_checkin(&self, checkin_id: i64) -> Result<Vec<Alert>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE checkin_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![checkin_id], alert_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn open_alerts_for_org(&self, org_id: i64) -> Result<Vec<Alert>> {
        let conn = self.lock()?;
        let open = status_list(AlertStatus::OPEN.iter().map(|s| s.as_str()));
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE org_id = ?1 AND status IN ({open})"
        ))?;
        let rows = stmt.query_map(params![org_id], alert_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_alert_status(
        &self,
        id: i64,
        to: AlertStatus,
        resolution: Resolution<'_>,
    ) -> Result<bool> {
        let allowed = to.allowed_from();
        if allowed.is_empty() {
            return Ok(false);
        }
        let from = status_list(allowed.iter().map(|s| s.as_str()));
        let conn = self.lock()?;
        let changed = if to.is_terminal() {
            conn.execute(
                &format!(
                    "UPDATE alerts SET status = ?1, resolved_at = ?2, resolved_by = ?3,
                                       resolution_notes = COALESCE(?4, resolution_notes)
                     WHERE id = ?5 AND status IN ({from})"
                ),
                params![
                    to.as_str(),
                    ts(resolution.at),
                    resolution.moderator_id,
                    resolution.notes,
                    id
                ],
            )?
        } else {
            conn.execute(
                &format!(
                    "UPDATE alerts SET status = ?1,
                                       resolution_notes = COALESCE(?2, resolution_notes)
                     WHERE id = ?3 AND status IN ({from})"
                ),
                params![to.as_str(), resolution.notes, id],
            )?
        };
        Ok(changed == 1)
    }

    fn insert_call_log(&self, new: &NewCallLog) -> Result<CallLog> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO call_logs (alert_id, admin_id, user_id, called_at, outcome,
                                    duration_secs, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.alert_id,
                new.admin_id,
                new.user_id,
                ts(new.called_at),
                new.outcome.as_str(),
                new.duration_secs,
                new.notes,
            ],
        )?;
        Ok(CallLog {
            id: conn.last_insert_rowid(),
            alert_id: new.alert_id,
            admin_id: new.admin_id,
            user_id: new.user_id,
            called_at: new.called_at,
            outcome: new.outcome,
            duration_secs: new.duration_secs,
            notes: new.notes.clone(),
        })
    }

    fn call_logs_for_checkin(&self, checkin_id: i64) -> Result<Vec<CallLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.alert_id, c.admin_id, c.user_id, c.called_at, c.outcome,
                    c.duration_secs, c.notes
             FROM call_logs c JOIN alerts a ON a.id = c.alert_id
             WHERE a.checkin_id = ?1
             ORDER BY c.called_at, c.id",
        )?;
        let rows = stmt.query_map(params![checkin_id], call_log_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_attempt(&self, attempt: &NewNotificationAttempt) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notification_attempts (checkin_id, alert_id, user_id, channel,
                                                notification_type, sent_at, delivery_status,
                                                error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                attempt.reference.checkin_id,
                attempt.reference.alert_id,
                attempt.reference.user_id,
                attempt.channel,
                attempt.reference.kind.as_string(),
                ts(attempt.sent_at),
                attempt.status.as_str(),
                attempt.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn attempts_for_checkin(&self, checkin_id: i64) -> Result<Vec<NotificationAttempt>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, checkin_id, alert_id, user_id, channel, notification_type, sent_at,
                    delivery_status, error_message
             FROM notification_attempts WHERE checkin_id = ?1
             ORDER BY sent_at, id",
        )?;
        let rows = stmt.query_map(params![checkin_id], attempt_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn upsert_device(&self, device: &Device) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO devices (token, user_id, platform, name, is_active, last_used_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(token) DO UPDATE SET
                user_id = excluded.user_id,
                platform = excluded.platform,
                name = excluded.name,
                is_active = 1,
                last_used_at = excluded.last_used_at",
            params![
                device.token,
                device.user_id,
                device.platform.as_str(),
                device.name,
                ts(device.last_used_at),
            ],
        )?;
        Ok(())
    }

    fn active_devices(&self, user_id: i64) -> Result<Vec<Device>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT token, user_id, platform, name, is_active, last_used_at
             FROM devices WHERE user_id = ?1 AND is_active = 1
             ORDER BY last_used_at DESC, token",
        )?;
        let rows = stmt.query_map(params![user_id], device_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn deactivate_device(&self, token: &str) -> Result<bool> {
        let changed = self.lock()?.execute(
            "UPDATE devices SET is_active = 0 WHERE token = ?1 AND is_active = 1",
            params![token],
        )?;
        Ok(changed == 1)
    }

    fn insert_timing(&self, new: &NewTiming) -> Result<SafetyTiming> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO safety_timings (user_id, org_id, label, time, active_days, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                new.user_id,
                new.org_id,
                new.label,
                new.time,
                new.active_days.to_json(),
            ],
        )?;
        Ok(SafetyTiming {
            id: conn.last_insert_rowid(),
            user_id: new.user_id,
            org_id: new.org_id,
            label: new.label.clone(),
            time: new.time.clone(),
            active_days: new.active_days.clone(),
            is_active: true,
        })
    }

    fn get_timing(&self, id: i64) -> Result<Option<SafetyTiming>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("SELECT {TIMING_COLUMNS} FROM safety_timings WHERE id = ?1"),
                params![id],
                timing_from_row,
            )
            .optional()?)
    }

    fn timings_for_user(&self, user_id: i64) -> Result<Vec<SafetyTiming>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TIMING_COLUMNS} FROM safety_timings WHERE user_id = ?1 ORDER BY time, id"
        ))?;
        let rows = stmt.query_map(params![user_id], timing_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn active_timings(&self) -> Result<Vec<SafetyTiming>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TIMING_COLUMNS} FROM safety_timings WHERE is_active = 1 ORDER BY time, id"
        ))?;
        let rows = stmt.query_map([], timing_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_timing_active(&self, id: i64, active: bool) -> Result<bool> {
        let changed = self.lock()?.execute(
            "UPDATE safety_timings SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(changed == 1)
    }

    fn upsert_profile(&self, user_id: i64, org_id: i64, full_name: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO user_profiles (user_id, org_id, full_name) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                org_id = excluded.org_id,
                full_name = excluded.full_name",
            params![user_id, org_id, full_name],
        )?;
        Ok(())
    }

    fn get_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT user_id, org_id, full_name, safe_pin_hash, danger_pin_hash
                 FROM user_profiles WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let safe: Option<String> = row.get(3)?;
                    let danger: Option<String> = row.get(4)?;
                    Ok(UserProfile {
                        user_id: row.get(0)?,
                        org_id: row.get(1)?,
                        full_name: row.get(2)?,
                        pins: safe
                            .zip(danger)
                            .map(|(safe, danger)| PinHashes { safe, danger }),
                    })
                },
            )
            .optional()?)
    }

    fn set_pin_hashes(&self, user_id: i64, hashes: &PinHashes) -> Result<bool> {
        let changed = self.lock()?.execute(
            "UPDATE user_profiles SET safe_pin_hash = ?1, danger_pin_hash = ?2
             WHERE user_id = ?3",
            params![hashes.safe, hashes.danger, user_id],
        )?;
        Ok(changed == 1)
    }

    fn insert_snooze_log(&self, log: &SnoozeLog) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR IGNORE INTO snooze_logs (checkin_id, snooze_number, sent_at,
                                                notification_delivered)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                log.checkin_id,
                log.snooze_number,
                ts(log.sent_at),
                log.notification_delivered,
            ],
        )?;
        Ok(())
    }

    fn snooze_logs(&self, checkin_id: i64) -> Result<Vec<SnoozeLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT checkin_id, snooze_number, sent_at, notification_delivered
             FROM snooze_logs WHERE checkin_id = ?1 ORDER BY snooze_number",
        )?;
        let rows = stmt.query_map(params![checkin_id], |row| {
            Ok(SnoozeLog {
                checkin_id: row.get(0)?,
                snooze_number: row.get(1)?,
                sent_at: get_ts(row, 2)?,
                notification_delivered: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn append_audit(
        &self,
        actor_id: Option<i64>,
        org_id: Option<i64>,
        event: &Event,
    ) -> Result<()> {
        let details = serde_json::to_string(event)?;
        let (entity, entity_id) = event.entity();
        self.lock()?.execute(
            "INSERT INTO audit_log (actor_id, org_id, action, entity, entity_id, details,
                                    created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                actor_id,
                org_id,
                event.action(),
                entity,
                entity_id,
                details,
                ts(event.at()),
            ],
        )?;
        Ok(())
    }

    fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, actor_id, org_id, action, entity, entity_id, details, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let details: String = row.get(6)?;
            Ok(AuditEntry {
                id: row.get(0)?,
                actor_id: row.get(1)?,
                org_id: row.get(2)?,
                action: row.get(3)?,
                entity: row.get(4)?,
                entity_id: row.get(5)?,
                details: serde_json::from_str(&details).map_err(|e| conversion(6, e))?,
                created_at: get_ts(row, 7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
