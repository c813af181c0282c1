//! Service façade: the mobile and moderator operations composed from the
//! engine components.
//!
//! Mobile callers are identified by `user_id` and moderators by
//! [`Moderator`]; both identities are issued and authenticated elsewhere.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::alert::{Alert, AlertEngine, AlertStatus, AlertType, EscalationTarget, RaiseContext};
use crate::checkin::{
    CheckIn, DayStats, MobileCheckIn, MobileStatus, PinType, Transition, MAX_SNOOZES,
};
use crate::clock::Clock;
use crate::credential::{PinClass, PinHashes, PinVerifier, UserProfile};
use crate::error::{ConflictError, CoreError, Result, ValidationError};
use crate::events::{self, Event};
use crate::notify::{
    Device, DispatcherConfig, NotificationDispatcher, Platform, PushChannel,
};
use crate::resolution::{CallOutcome, CallResult, Moderator, ResolutionCoordinator};
use crate::scheduler::{Scheduler, SnoozeLog};
use crate::storage::{Config, SchedulerConfig};
use crate::store::{ResolveOutcome, SafetyStore};
use crate::timeline::{self, IncidentTimeline, ResolvedIncident};
use crate::timing::{NewTiming, SafetyTiming};

/// Wire response of `verify_pin`. Identical for safe and danger PINs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub checkin_id: i64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeResponse {
    pub checkin_id: i64,
    pub snooze_count: u8,
    pub remaining: u8,
}

/// The user's own view of a day. Safe and danger answers look the same.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodayCheckins {
    pub date: NaiveDate,
    pub checkins: Vec<MobileCheckIn>,
    pub stats: DayStats,
}

pub struct SafetyService {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    verifier: PinVerifier,
    alerts: Arc<AlertEngine>,
    scheduler: Arc<Scheduler>,
    resolution: ResolutionCoordinator,
    scheduler_config: SchedulerConfig,
    verify_floor: Duration,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SafetyService {
    pub fn new(
        store: Arc<dyn SafetyStore>,
        channel: Arc<dyn PushChannel>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            channel,
            clock.clone(),
            DispatcherConfig::from(&config.notifications),
        ));
        let alerts = Arc::new(AlertEngine::new(store.clone(), dispatcher.clone(), clock.clone()));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            alerts.clone(),
            dispatcher,
            clock.clone(),
            config.scheduler.clone(),
        ));
        let resolution = ResolutionCoordinator::new(store.clone(), alerts.clone(), clock.clone());
        Ok(Self {
            verifier: PinVerifier::new(&config.security)?,
            store,
            clock,
            alerts,
            scheduler,
            resolution,
            scheduler_config: config.scheduler.clone(),
            verify_floor: config.security.verify_floor(),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn SafetyStore> {
        &self.store
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Wait for background notification tasks started so far.
    pub async fn drain_background(&self) {
        let handles: Vec<_> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background notification task failed");
            }
        }
    }

    fn spawn_background<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }

    /// Load a check-in owned by `user_id`. Someone else's check-in looks
    /// exactly like a missing one.
    fn owned_checkin(&self, user_id: i64, checkin_id: i64) -> Result<CheckIn> {
        match self.store.get_checkin(checkin_id)? {
            Some(c) if c.user_id == user_id => Ok(c),
            _ => Err(CoreError::NotFound {
                entity: "checkin",
                id: checkin_id,
            }),
        }
    }

    fn profile(&self, user_id: i64) -> Result<UserProfile> {
        self.store.get_profile(user_id)?.ok_or(CoreError::NotFound {
            entity: "user",
            id: user_id,
        })
    }

    /// Rejection for a mobile caller; reports the status the user sees.
    fn stale(checkin: &CheckIn, operation: &'static str) -> CoreError {
        ConflictError::StaleCheckin {
            checkin_id: checkin.id,
            status: MobileStatus::of(checkin).to_string(),
            operation,
        }
        .into()
    }

    async fn classify(&self, pin: &str, pins: Option<PinHashes>) -> Result<PinClass> {
        let verifier = self.verifier.clone();
        let pin = pin.to_string();
        tokio::task::spawn_blocking(move || verifier.classify(&pin, pins.as_ref()))
            .await
            .map_err(|e| CoreError::Credential(e.to_string()))?
    }

    async fn hash_pair(&self, safe: &str, danger: &str) -> Result<PinHashes> {
        let verifier = self.verifier.clone();
        let (safe, danger) = (safe.to_string(), danger.to_string());
        tokio::task::spawn_blocking(move || verifier.hash_pair(&safe, &danger))
            .await
            .map_err(|e| CoreError::Credential(e.to_string()))?
    }

    // -- mobile --

    /// Confirm a check-in with either PIN.
    ///
    /// Every call takes at least `security.verify_floor_ms`, whatever the
    /// outcome. A danger PIN stores its alert before returning; moderators
    /// are notified from a background task.
    pub async fn verify_pin(
        &self,
        user_id: i64,
        checkin_id: i64,
        pin: &str,
    ) -> Result<VerifyResponse> {
        let deadline = tokio::time::Instant::now() + self.verify_floor;
        let result = self.verify_inner(user_id, checkin_id, pin).await;
        tokio::time::sleep_until(deadline).await;
        result
    }

    async fn verify_inner(&self, user_id: i64, checkin_id: i64, pin: &str) -> Result<VerifyResponse> {
        let mut checkin = self.owned_checkin(user_id, checkin_id)?;
        crate::credential::validate_pin_format(pin)?;
        if !checkin.status.awaits_response() {
            return Err(Self::stale(&checkin, "verify"));
        }

        let pins = self.store.get_profile(user_id)?.and_then(|p| p.pins);
        let Some(pin_type) = self.classify(pin, pins).await?.pin_type() else {
            return Err(CoreError::InvalidPin);
        };

        let now = self.clock.now();
        let transition = Transition::Acknowledge { pin: pin_type, at: now };
        // A danger acknowledgement and its alert are written together.
        let raised = match pin_type {
            PinType::Safe => self
                .store
                .apply_transition(checkin_id, &transition)?
                .then_some(None),
            PinType::Danger => self
                .alerts
                .record_with(&transition, AlertType::DangerPin, RaiseContext::new(&checkin))?
                .map(Some),
        };
        let Some(raised) = raised else {
            let current = self.owned_checkin(user_id, checkin_id)?;
            return Err(Self::stale(&current, "verify"));
        };
        transition.apply(&mut checkin);
        events::record(
            self.store.as_ref(),
            Some(user_id),
            Some(checkin.org_id),
            &Event::CheckinAcknowledged {
                checkin_id,
                user_id,
                pin: pin_type,
                at: now,
            },
        );

        if let Some(raised) = raised.filter(|r| r.created) {
            let engine = self.alerts.clone();
            let alert = raised.alert;
            self.spawn_background(async move {
                engine.notify(&alert).await;
            });
        }

        Ok(VerifyResponse {
            checkin_id,
            status: "completed".to_string(),
            timestamp: now,
        })
    }

    /// Postpone a check-in by one reminder interval.
    pub fn snooze(&self, user_id: i64, checkin_id: i64) -> Result<SnoozeResponse> {
        let mut checkin = self.owned_checkin(user_id, checkin_id)?;
        if !checkin.status.awaits_response() {
            return Err(Self::stale(&checkin, "snooze"));
        }
        if checkin.snooze_count >= MAX_SNOOZES {
            return Err(ConflictError::SnoozeLimit(checkin_id).into());
        }

        let now = self.clock.now();
        let transition = Transition::Snooze {
            expected_count: checkin.snooze_count,
            at: now,
        };
        if !self.store.apply_transition(checkin_id, &transition)? {
            let current = self.owned_checkin(user_id, checkin_id)?;
            if current.status.awaits_response() && current.snooze_count >= MAX_SNOOZES {
                return Err(ConflictError::SnoozeLimit(checkin_id).into());
            }
            return Err(Self::stale(&current, "snooze"));
        }
        transition.apply(&mut checkin);

        self.store.insert_snooze_log(&SnoozeLog {
            checkin_id,
            snooze_number: checkin.snooze_count,
            sent_at: now,
            notification_delivered: false,
        })?;
        events::record(
            self.store.as_ref(),
            Some(user_id),
            Some(checkin.org_id),
            &Event::CheckinSnoozed {
                checkin_id,
                snooze_count: checkin.snooze_count,
                by_user: true,
                at: now,
            },
        );
        self.scheduler.arm(
            checkin_id,
            checkin.snooze_count,
            now + self.scheduler_config.reminder_interval(),
        );
        tracing::info!(checkin_id, snooze_count = checkin.snooze_count, "check-in snoozed by user");

        Ok(SnoozeResponse {
            checkin_id,
            snooze_count: checkin.snooze_count,
            remaining: checkin.remaining_snoozes(),
        })
    }

    /// First-time PIN setup.
    pub async fn setup_pins(&self, user_id: i64, safe: &str, danger: &str) -> Result<()> {
        let profile = self.profile(user_id)?;
        if profile.pins.is_some() {
            return Err(ConflictError::PinsAlreadySet(user_id).into());
        }
        let hashes = self.hash_pair(safe, danger).await?;
        self.store.set_pin_hashes(user_id, &hashes)?;
        events::record(
            self.store.as_ref(),
            Some(user_id),
            Some(profile.org_id),
            &Event::PinsConfigured {
                user_id,
                rotated: false,
                at: self.clock.now(),
            },
        );
        tracing::info!(user_id, "PINs configured");
        Ok(())
    }

    /// Replace both PINs. Requires the current safe PIN.
    pub async fn rotate_pins(
        &self,
        user_id: i64,
        current_safe: &str,
        new_safe: &str,
        new_danger: &str,
    ) -> Result<()> {
        let profile = self.profile(user_id)?;
        if self.classify(current_safe, profile.pins).await? != PinClass::Safe {
            return Err(CoreError::InvalidPin);
        }
        let hashes = self.hash_pair(new_safe, new_danger).await?;
        self.store.set_pin_hashes(user_id, &hashes)?;
        events::record(
            self.store.as_ref(),
            Some(user_id),
            Some(profile.org_id),
            &Event::PinsConfigured {
                user_id,
                rotated: true,
                at: self.clock.now(),
            },
        );
        tracing::info!(user_id, "PINs rotated");
        Ok(())
    }

    pub fn register_device(
        &self,
        user_id: i64,
        token: &str,
        platform: Platform,
        name: Option<&str>,
    ) -> Result<Device> {
        if token.trim().is_empty() {
            return Err(ValidationError::MissingField("fcm_token").into());
        }
        self.profile(user_id)?;
        let device = Device {
            user_id,
            token: token.trim().to_string(),
            platform,
            name: name.map(str::to_string),
            is_active: true,
            last_used_at: self.clock.now(),
        };
        self.store.upsert_device(&device)?;
        tracing::info!(user_id, platform = platform.as_str(), "device registered");
        Ok(device)
    }

    pub fn deactivate_device(&self, user_id: i64, token: &str) -> Result<()> {
        let owned = self
            .store
            .active_devices(user_id)?
            .iter()
            .any(|d| d.token == token);
        if !owned || !self.store.deactivate_device(token)? {
            return Err(CoreError::NotFound {
                entity: "device",
                id: user_id,
            });
        }
        Ok(())
    }

    pub fn create_timing<S: AsRef<str>>(
        &self,
        user_id: i64,
        label: &str,
        time: &str,
        active_days: &[S],
    ) -> Result<SafetyTiming> {
        let profile = self.profile(user_id)?;
        let new = NewTiming::validate(user_id, profile.org_id, label, time, active_days)?;
        let timing = self.store.insert_timing(&new)?;
        tracing::info!(timing_id = timing.id, user_id, time = %timing.time, "timing created");
        Ok(timing)
    }

    pub fn set_timing_active(&self, user_id: i64, timing_id: i64, active: bool) -> Result<()> {
        match self.store.get_timing(timing_id)? {
            Some(t) if t.user_id == user_id => {
                self.store.set_timing_active(timing_id, active)?;
                Ok(())
            }
            _ => Err(CoreError::NotFound {
                entity: "timing",
                id: timing_id,
            }),
        }
    }

    pub fn timings(&self, user_id: i64) -> Result<Vec<SafetyTiming>> {
        self.store.timings_for_user(user_id)
    }

    /// The user's check-ins for the current UTC day with per-status counts,
    /// in the mobile projection.
    pub fn today_checkins(&self, user_id: i64) -> Result<TodayCheckins> {
        let date = self.clock.now().date_naive();
        let checkins: Vec<MobileCheckIn> = self
            .store
            .checkins_for_user_on(user_id, date)?
            .iter()
            .map(MobileCheckIn::from)
            .collect();
        let stats = DayStats::from_checkins(&checkins);
        Ok(TodayCheckins {
            date,
            checkins,
            stats,
        })
    }

    // -- moderator --

    pub fn active_alerts(&self, moderator: Moderator) -> Result<Vec<Alert>> {
        timeline::active_alerts(self.store.as_ref(), moderator)
    }

    pub fn alert_timeline(&self, moderator: Moderator, alert_id: i64) -> Result<IncidentTimeline> {
        timeline::alert_timeline(self.store.as_ref(), moderator, alert_id)
    }

    /// Closed incidents of the moderator's organisation, newest first.
    pub fn resolved_incidents(
        &self,
        moderator: Moderator,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<ResolvedIncident>> {
        timeline::resolved_incidents(self.store.as_ref(), moderator, range)
    }

    pub async fn log_call(
        &self,
        moderator: Moderator,
        alert_id: i64,
        outcome: CallOutcome,
        duration_secs: Option<u32>,
        notes: Option<String>,
    ) -> Result<CallResult> {
        self.resolution
            .log_call(moderator, alert_id, outcome, duration_secs, notes)
            .await
    }

    pub async fn escalate(
        &self,
        moderator: Moderator,
        checkin_id: i64,
        target: EscalationTarget,
    ) -> Result<Alert> {
        self.resolution.escalate(moderator, checkin_id, target).await
    }

    pub fn resolve(
        &self,
        moderator: Moderator,
        checkin_id: i64,
        notes: Option<&str>,
    ) -> Result<ResolveOutcome> {
        self.resolution.resolve(moderator, checkin_id, notes)
    }

    /// Acknowledge, start, or close a single alert.
    pub fn update_alert_status(
        &self,
        moderator: Moderator,
        alert_id: i64,
        to: AlertStatus,
        notes: Option<&str>,
    ) -> Result<Alert> {
        self.alerts.update_status(moderator, alert_id, to, notes)
    }
}
