use std::io::Write;

use clap::Subcommand;
use safecheck_core::SafetyService;

use super::{print_json, CmdResult, Context};

#[derive(Subcommand)]
pub enum CheckinAction {
    /// Today's check-ins and counts
    Today { user_id: i64 },
    /// Answer a check-in with a PIN
    Verify {
        user_id: i64,
        checkin_id: i64,
        pin: String,
    },
    /// Postpone a check-in by one reminder interval
    Snooze { user_id: i64, checkin_id: i64 },
}

pub async fn run(action: CheckinAction) -> CmdResult {
    let ctx = Context::open()?;
    match action {
        CheckinAction::Today { user_id } => print_json(&ctx.service.today_checkins(user_id)?)?,
        CheckinAction::Verify {
            user_id,
            checkin_id,
            pin,
        } => {
            let mut stdout = std::io::stdout();
            verify_then_drain(&ctx.service, &mut stdout, user_id, checkin_id, &pin).await?;
        }
        CheckinAction::Snooze {
            user_id,
            checkin_id,
        } => print_json(&ctx.service.snooze(user_id, checkin_id)?)?,
    }
    Ok(())
}

/// Write the verify response as soon as it is ready, then keep the process
/// alive until background moderator notifications finish. The caller sees
/// the same latency for either PIN.
async fn verify_then_drain<W: Write>(
    service: &SafetyService,
    out: &mut W,
    user_id: i64,
    checkin_id: i64,
    pin: &str,
) -> CmdResult {
    let response = service.verify_pin(user_id, checkin_id, pin).await?;
    writeln!(out, "{}", serde_json::to_string_pretty(&response)?)?;
    out.flush()?;
    service.drain_background().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use chrono::Utc;
    use safecheck_core::error::DeliveryError;
    use safecheck_core::notify::{PushMessage, PushTarget};
    use safecheck_core::{Config, PushChannel, SafetyDb, SafetyStore, SystemClock};
    use tokio::sync::Semaphore;

    /// Holds every send until `open` is called.
    struct GatedChannel {
        gate: Semaphore,
        sent: Mutex<Vec<String>>,
    }

    impl GatedChannel {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn open(&self) {
            self.gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    #[async_trait]
    impl PushChannel for GatedChannel {
        fn name(&self) -> &str {
            "gated"
        }

        async fn send(
            &self,
            target: &PushTarget,
            _message: &PushMessage,
        ) -> Result<String, DeliveryError> {
            let _permit = self.gate.acquire().await;
            self.sent.lock().unwrap().push(target.label().to_string());
            Ok("sent".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn danger_response_is_printed_before_moderators_are_notified() {
        let mut config = Config::default();
        config.security.verify_floor_ms = 20;
        config.security.argon2_memory_kib = 256;
        config.security.argon2_iterations = 1;
        config.security.argon2_parallelism = 1;
        config.notifications.send_timeout_secs = 30;

        let db = Arc::new(SafetyDb::open_memory().unwrap());
        let channel = Arc::new(GatedChannel::new());
        let service = Arc::new(
            SafetyService::new(db.clone(), channel.clone(), Arc::new(SystemClock), &config)
                .unwrap(),
        );
        db.upsert_profile(1, 10, "Ada").unwrap();
        service.setup_pins(1, "1234", "4321").await.unwrap();
        let days = [
            "monday",
            "tuesday",
            "wednesday",
            "thursday",
            "friday",
            "saturday",
            "sunday",
        ];
        let timing = service.create_timing(1, "night", "00:00", &days).unwrap();
        let now = Utc::now();
        let checkin = service
            .scheduler()
            .create_checkin(&timing, now.date_naive(), now)
            .await
            .unwrap()
            .unwrap();

        let out = SharedBuf::default();
        let task = tokio::spawn({
            let service = service.clone();
            let mut out = out.clone();
            async move {
                verify_then_drain(&service, &mut out, 1, checkin.id, "4321")
                    .await
                    .map_err(|e| e.to_string())
            }
        });

        let give_up = Instant::now() + Duration::from_secs(10);
        while out.contents().is_empty() {
            assert!(Instant::now() < give_up, "no response written");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let printed: serde_json::Value = serde_json::from_str(&out.contents()).unwrap();
        assert_eq!(printed["status"], "completed");
        assert!(!task.is_finished(), "still waiting on the moderator push");
        assert!(channel.sent.lock().unwrap().is_empty());

        channel.open();
        task.await.unwrap().unwrap();
        assert_eq!(channel.sent.lock().unwrap().as_slice(), ["org_10_alerts"]);
    }
}
