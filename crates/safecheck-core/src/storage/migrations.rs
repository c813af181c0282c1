//! Database schema migrations for safecheck.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Current schema version; 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i32>>(0)
    }) {
        Ok(version) => Ok(version.unwrap_or(0)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: base tables.
///
/// Status and enum columns carry CHECK constraints so a bad write fails in
/// the database rather than surfacing later as an unreadable row.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_profiles (
            user_id         INTEGER PRIMARY KEY,
            org_id          INTEGER NOT NULL,
            full_name       TEXT NOT NULL,
            safe_pin_hash   TEXT,
            danger_pin_hash TEXT
        );

        CREATE TABLE IF NOT EXISTS safety_timings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            org_id      INTEGER NOT NULL,
            label       TEXT NOT NULL,
            time        TEXT NOT NULL,
            active_days TEXT NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS checkins (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id        INTEGER NOT NULL,
            org_id         INTEGER NOT NULL,
            timing_id      INTEGER NOT NULL,
            scheduled_time TEXT NOT NULL,
            checkin_date   TEXT NOT NULL,
            scheduled_at   TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending' CHECK (status IN (
                'pending', 'acknowledged_safe', 'acknowledged_danger',
                'snoozed', 'escalated_no_response', 'resolved')),
            snooze_count   INTEGER NOT NULL DEFAULT 0 CHECK (snooze_count BETWEEN 0 AND 3),
            last_snooze_at TEXT,
            response_at    TEXT,
            pin_type_used  TEXT CHECK (pin_type_used IN ('safe', 'danger')),
            resolved_at    TEXT,
            resolved_by    INTEGER,
            created_at     TEXT NOT NULL,
            UNIQUE (timing_id, checkin_date)
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            checkin_id        INTEGER NOT NULL REFERENCES checkins(id),
            user_id           INTEGER NOT NULL,
            org_id            INTEGER NOT NULL,
            alert_type        TEXT NOT NULL CHECK (alert_type IN (
                'danger_pin', 'no_response_after_snooze', 'call_failed', 'manual')),
            escalation_target TEXT CHECK (escalation_target IN ('police', 'family', 'admin')),
            priority          TEXT NOT NULL CHECK (priority IN ('low', 'medium', 'high', 'critical')),
            status            TEXT NOT NULL DEFAULT 'pending' CHECK (status IN (
                'pending', 'acknowledged', 'in_progress', 'resolved', 'false_alarm')),
            created_at        TEXT NOT NULL,
            resolved_at       TEXT,
            resolved_by       INTEGER,
            resolution_notes  TEXT
        );

        CREATE TABLE IF NOT EXISTS call_logs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            alert_id      INTEGER NOT NULL REFERENCES alerts(id),
            admin_id      INTEGER NOT NULL,
            user_id       INTEGER NOT NULL,
            called_at     TEXT NOT NULL,
            outcome       TEXT NOT NULL CHECK (outcome IN (
                'initiated', 'ringing', 'attended_safe', 'attended_not_safe',
                'not_attended', 'failed')),
            duration_secs INTEGER,
            notes         TEXT
        );

        CREATE TABLE IF NOT EXISTS notification_attempts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            checkin_id        INTEGER NOT NULL,
            alert_id          INTEGER,
            user_id           INTEGER NOT NULL,
            channel           TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            sent_at           TEXT NOT NULL,
            delivery_status   TEXT NOT NULL CHECK (delivery_status IN ('sent', 'delivered', 'failed')),
            error_message     TEXT
        );

        CREATE TABLE IF NOT EXISTS devices (
            token        TEXT PRIMARY KEY,
            user_id      INTEGER NOT NULL,
            platform     TEXT NOT NULL CHECK (platform IN ('ios', 'android')),
            name         TEXT,
            is_active    INTEGER NOT NULL DEFAULT 1,
            last_used_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snooze_logs (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            checkin_id             INTEGER NOT NULL REFERENCES checkins(id),
            snooze_number          INTEGER NOT NULL CHECK (snooze_number BETWEEN 1 AND 3),
            sent_at                TEXT NOT NULL,
            notification_delivered INTEGER NOT NULL DEFAULT 0,
            UNIQUE (checkin_id, snooze_number)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            actor_id   INTEGER,
            org_id     INTEGER,
            action     TEXT NOT NULL,
            entity     TEXT NOT NULL,
            entity_id  INTEGER NOT NULL,
            details    TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: indexes for the scheduler scan and the dashboard.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_checkins_status ON checkins(status);
         CREATE INDEX IF NOT EXISTS idx_checkins_user_date ON checkins(user_id, checkin_date);
         CREATE INDEX IF NOT EXISTS idx_alerts_org_status ON alerts(org_id, status);
         CREATE INDEX IF NOT EXISTS idx_alerts_checkin ON alerts(checkin_id);
         CREATE INDEX IF NOT EXISTS idx_call_logs_alert ON call_logs(alert_id);
         CREATE INDEX IF NOT EXISTS idx_attempts_checkin ON notification_attempts(checkin_id);
         CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id, is_active);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: resolved-incident history by organisation.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_checkins_org_resolved
             ON checkins(org_id, status, resolved_at);",
    )?;
    set_schema_version(&tx, 3)?;
    tx.commit()
}
