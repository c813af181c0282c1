//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use safecheck_core::error::DeliveryError;
use safecheck_core::notify::{PushMessage, PushTarget};
use safecheck_core::{
    CheckIn, Clock, Config, ManualClock, Platform, PushChannel, SafetyDb, SafetyService, SafetyStore,
};

pub const USER: i64 = 1;
pub const ORG: i64 = 10;
pub const SAFE_PIN: &str = "1234";
pub const DANGER_PIN: &str = "4321";

/// One send seen by [`RecordingChannel`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub target: String,
    pub message: PushMessage,
}

/// Accepts every send except to tokens starting with `bad`.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.target == target).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, target: &PushTarget, message: &PushMessage) -> Result<String, DeliveryError> {
        self.sent.lock().unwrap().push(Sent {
            target: target.label().to_string(),
            message: message.clone(),
        });
        if target.label().starts_with("bad") {
            Err(DeliveryError::Unregistered)
        } else {
            Ok(format!("msg-{}", target.label()))
        }
    }
}

/// 2024-01-01 (a Monday) at `hh:mm` UTC.
pub fn at(hh: u32, mm: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hh, mm, 0).unwrap()
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.security.verify_floor_ms = 40;
    config.security.argon2_memory_kib = 256;
    config.security.argon2_iterations = 1;
    config.security.argon2_parallelism = 1;
    config.notifications.send_timeout_secs = 2;
    config
}

pub struct Harness {
    pub db: Arc<SafetyDb>,
    pub clock: Arc<ManualClock>,
    pub channel: Arc<RecordingChannel>,
    pub service: SafetyService,
}

impl Harness {
    /// A user in [`ORG`] with one device, both PINs set, and the clock at 09:00.
    pub async fn new() -> Self {
        Self::with_db(SafetyDb::open_memory().unwrap()).await
    }

    /// Same as [`Harness::new`] over a database file other services and
    /// raw connections can open too.
    pub async fn on_file(path: &Path) -> Self {
        Self::with_db(SafetyDb::open(path).unwrap()).await
    }

    async fn with_db(db: SafetyDb) -> Self {
        let db = Arc::new(db);
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let channel = Arc::new(RecordingChannel::default());
        let service =
            SafetyService::new(db.clone(), channel.clone(), clock.clone(), &test_config()).unwrap();

        db.upsert_profile(USER, ORG, "Ada Lovelace").unwrap();
        service
            .register_device(USER, "phone-1", Platform::Android, Some("Pixel"))
            .unwrap();
        service.setup_pins(USER, SAFE_PIN, DANGER_PIN).await.unwrap();

        Self {
            db,
            clock,
            channel,
            service,
        }
    }

    /// Create today's 09:00 check-in through the scheduler.
    pub async fn due_checkin(&self) -> CheckIn {
        self.service
            .create_timing(USER, "morning_checkin", "09:00", &["monday", "tuesday"])
            .unwrap();
        let created = self
            .service
            .scheduler()
            .materialize_due(self.clock.now())
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        created.into_iter().next().unwrap()
    }

    /// Advance the clock by `minutes` and fire whatever is due.
    pub async fn advance(&self, minutes: i64) -> Vec<safecheck_core::TickOutcome> {
        self.clock.advance(Duration::minutes(minutes));
        self.service.scheduler().tick(self.clock.now()).await
    }

    /// A second service over the database file at `path`, sharing this
    /// harness's clock and channel but with its own scheduler queue.
    pub fn other_process(&self, path: &Path) -> SafetyService {
        let db = Arc::new(SafetyDb::open(path).unwrap());
        SafetyService::new(db, self.channel.clone(), self.clock.clone(), &test_config()).unwrap()
    }

    pub fn checkin(&self, id: i64) -> CheckIn {
        self.db.get_checkin(id).unwrap().unwrap()
    }
}

/// Make every insert into `table` matching `when` fail, through a separate
/// connection to the database file.
pub fn fail_inserts(path: &Path, table: &str, when: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table} WHEN {when}
         BEGIN SELECT RAISE(ABORT, '{table} unavailable'); END;"
    ))
    .unwrap();
}

pub fn allow_inserts(path: &Path, table: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(&format!("DROP TRIGGER fail_{table};")).unwrap();
}
