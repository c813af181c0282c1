//! Snooze/deadline scheduler.
//!
//! A single loop owns a [`DeadlineQueue`]. When a deadline fires the
//! check-in is re-read. An answered or resolved check-in makes the entry
//! stale. One snoozed by someone else (possibly another process sharing the
//! database) is followed to its current window. Otherwise the loop snoozes
//! it and sends a reminder, or after [`MAX_SNOOZES`] reminders escalates it
//! and raises a `no_response_after_snooze` alert in the same write.
//!
//! The same loop creates each day's check-ins from the active timings
//! (see [`Scheduler::materialize_due`]).

mod queue;

pub use queue::{Deadline, DeadlineQueue};

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};

use crate::alert::{AlertEngine, AlertType, RaiseContext};
use crate::checkin::{CheckIn, NewCheckIn, Transition, MAX_SNOOZES};
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{self, Event};
use crate::notify::{NotificationDispatcher, NotificationKind, NotificationRef, PushMessage};
use crate::storage::SchedulerConfig;
use crate::store::SafetyStore;
use crate::timing::SafetyTiming;

/// One reminder window that passed without a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeLog {
    pub checkin_id: i64,
    /// 1..=3
    pub snooze_number: u8,
    pub sent_at: DateTime<Utc>,
    pub notification_delivered: bool,
}

/// What a fired deadline did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Snoozed {
        checkin_id: i64,
        snooze_count: u8,
        delivered: bool,
    },
    Escalated {
        checkin_id: i64,
        alert_id: i64,
    },
    /// The check-in moved to a later window elsewhere; a deadline for that
    /// window was armed at `at`.
    Rearmed {
        checkin_id: i64,
        at: DateTime<Utc>,
    },
    Stale {
        checkin_id: i64,
    },
}

pub struct Scheduler {
    store: Arc<dyn SafetyStore>,
    alerts: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    queue: Mutex<DeadlineQueue>,
    wake: Notify,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SafetyStore>,
        alerts: Arc<AlertEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            alerts,
            dispatcher,
            clock,
            config,
            queue: Mutex::new(DeadlineQueue::new()),
            wake: Notify::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, DeadlineQueue> {
        // The queue holds plain data; a panic mid-push leaves it usable.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a deadline. Wakes the loop if it is now the earliest.
    pub fn arm(&self, checkin_id: i64, expected_count: u8, at: DateTime<Utc>) {
        let earliest = self.queue().push(Deadline {
            at,
            checkin_id,
            expected_count,
        });
        tracing::debug!(checkin_id, expected_count, at = %at, "deadline armed");
        if earliest {
            self.wake.notify_one();
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue().peek()
    }

    pub fn pending_deadlines(&self) -> usize {
        self.queue().len()
    }

    /// Fire every deadline due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TickOutcome> {
        let due = self.queue().pop_due(now);
        let mut outcomes = Vec::with_capacity(due.len());
        for deadline in due {
            match self.fire(deadline, now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // The retry re-reads the check-in, so a snooze that was
                    // applied before the failure is followed.
                    tracing::warn!(
                        checkin_id = deadline.checkin_id,
                        error = %e,
                        "deadline failed; re-arming"
                    );
                    self.arm(
                        deadline.checkin_id,
                        deadline.expected_count,
                        now + self.config.reminder_interval(),
                    );
                }
            }
        }
        outcomes
    }

    async fn fire(&self, deadline: Deadline, now: DateTime<Utc>) -> Result<TickOutcome> {
        let checkin_id = deadline.checkin_id;
        let stale = TickOutcome::Stale { checkin_id };

        let Some(checkin) = self.store.get_checkin(checkin_id)? else {
            return Ok(stale);
        };
        if !checkin.status.awaits_response() {
            tracing::debug!(checkin_id, status = %checkin.status, "stale deadline");
            return Ok(stale);
        }
        let count = checkin.snooze_count;
        if count != deadline.expected_count {
            // Snoozed elsewhere (user, another process, or a tick that failed
            // after its snooze). Follow the current window.
            if self.queue().contains(checkin_id, count) {
                tracing::debug!(checkin_id, count, expected = deadline.expected_count, "superseded deadline");
                return Ok(stale);
            }
            let due = checkin.window_start() + self.config.reminder_interval();
            if due > now {
                self.arm(checkin_id, count, due);
                return Ok(TickOutcome::Rearmed { checkin_id, at: due });
            }
        }

        if count < MAX_SNOOZES {
            return self.snooze(checkin, count, now).await;
        }
        let transition = Transition::EscalateNoResponse { at: now };
        let Some(raised) = self.alerts.record_with(
            &transition,
            AlertType::NoResponseAfterSnooze,
            RaiseContext::new(&checkin),
        )?
        else {
            return Ok(stale);
        };
        tracing::info!(checkin_id, "check-in escalated after missed reminders");
        events::record(
            self.store.as_ref(),
            None,
            Some(checkin.org_id),
            &Event::CheckinEscalated { checkin_id, at: now },
        );
        if raised.created {
            self.alerts.notify(&raised.alert).await;
        }
        Ok(TickOutcome::Escalated {
            checkin_id,
            alert_id: raised.alert.id,
        })
    }

    async fn snooze(&self, mut checkin: CheckIn, expected: u8, now: DateTime<Utc>) -> Result<TickOutcome> {
        let checkin_id = checkin.id;
        let transition = Transition::Snooze {
            expected_count: expected,
            at: now,
        };
        if !self.store.apply_transition(checkin_id, &transition)? {
            return Ok(TickOutcome::Stale { checkin_id });
        }
        transition.apply(&mut checkin);
        let number = checkin.snooze_count;

        let reference = NotificationRef {
            checkin_id,
            alert_id: None,
            user_id: checkin.user_id,
            kind: NotificationKind::SnoozeReminder(number),
        };
        let message = PushMessage::snooze_reminder(checkin_id, number, checkin.remaining_snoozes());
        let delivered = self
            .dispatcher
            .fan_out_to_user(reference, &message)
            .await
            .is_delivered();

        self.store.insert_snooze_log(&SnoozeLog {
            checkin_id,
            snooze_number: number,
            sent_at: now,
            notification_delivered: delivered,
        })?;
        let org = Some(checkin.org_id);
        events::record(
            self.store.as_ref(),
            None,
            org,
            &Event::CheckinSnoozed {
                checkin_id,
                snooze_count: number,
                by_user: false,
                at: now,
            },
        );
        events::record(
            self.store.as_ref(),
            None,
            org,
            &Event::ReminderSent {
                checkin_id,
                snooze_number: number,
                delivered,
                at: now,
            },
        );
        tracing::info!(checkin_id, snooze_count = number, delivered, "reminder sent");

        self.arm(checkin_id, number, now + self.config.reminder_interval());
        Ok(TickOutcome::Snoozed {
            checkin_id,
            snooze_count: number,
            delivered,
        })
    }

    /// Create the check-in for `timing` on `date`, notify the user and arm
    /// the first deadline. `None` if it already exists.
    pub async fn create_checkin(
        &self,
        timing: &SafetyTiming,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckIn>> {
        let scheduled_at = timing.deadline_on(date)?;
        let new = NewCheckIn {
            user_id: timing.user_id,
            org_id: timing.org_id,
            timing_id: timing.id,
            scheduled_time: timing.time.clone(),
            checkin_date: date,
            scheduled_at,
        };
        let Some(checkin) = self.store.insert_checkin(&new, now)? else {
            return Ok(None);
        };
        tracing::info!(checkin_id = checkin.id, user_id = checkin.user_id, "check-in created");
        events::record(
            self.store.as_ref(),
            None,
            Some(checkin.org_id),
            &Event::CheckinCreated {
                checkin_id: checkin.id,
                user_id: checkin.user_id,
                scheduled_at,
                at: now,
            },
        );

        let reference = NotificationRef {
            checkin_id: checkin.id,
            alert_id: None,
            user_id: checkin.user_id,
            kind: NotificationKind::InitialCheckin,
        };
        let message = PushMessage::checkin_due(checkin.id, &timing.label, &timing.time);
        self.dispatcher.fan_out_to_user(reference, &message).await;

        // A late start must not fire the first reminder immediately.
        let window_start = scheduled_at.max(now);
        self.arm(checkin.id, 0, window_start + self.config.reminder_interval());
        Ok(Some(checkin))
    }

    /// Create today's check-ins for every active timing whose time has come.
    pub async fn materialize_due(&self, now: DateTime<Utc>) -> Result<Vec<CheckIn>> {
        let today = now.date_naive();
        let mut created = Vec::new();
        for timing in self.store.active_timings()? {
            if !timing.runs_on(today) {
                continue;
            }
            match timing.deadline_on(today) {
                Ok(at) if at <= now => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(timing_id = timing.id, error = %e, "skipping timing");
                    continue;
                }
            }
            if let Some(checkin) = self.create_checkin(&timing, today, now).await? {
                created.push(checkin);
            }
        }
        Ok(created)
    }

    /// Re-arm every check-in still waiting on the user. Called once on start.
    pub fn recover(&self) -> Result<usize> {
        let open = self.store.checkins_awaiting_response()?;
        let interval = self.config.reminder_interval();
        for checkin in &open {
            self.arm(checkin.id, checkin.snooze_count, checkin.window_start() + interval);
        }
        tracing::info!(count = open.len(), "recovered open check-ins");
        Ok(open.len())
    }

    /// Drive the scheduler until `shutdown` turns true or its sender drops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = self.clock.now();
            if self.config.materialize {
                if let Err(e) = self.materialize_due(now).await {
                    tracing::warn!(error = %e, "materialization failed");
                }
            }
            self.tick(now).await;

            let poll = self.config.poll_interval();
            let sleep_for = self
                .next_deadline()
                .map(|at| (at - self.clock.now()).to_std().unwrap_or_default().min(poll))
                .unwrap_or(poll);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}
