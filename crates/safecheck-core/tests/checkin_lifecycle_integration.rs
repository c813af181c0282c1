//! End-to-end check-in lifecycle: creation, reminders, escalation, user
//! snoozes, device fan-out and restart recovery.

mod common;

use std::sync::Arc;

use common::{at, Harness, ORG, SAFE_PIN, USER};
use safecheck_core::notify::DeliveryStatus;
use safecheck_core::{
    AlertStatus, AlertType, CheckinStatus, ConflictError, CoreError, Platform, Priority,
    SafetyService, SafetyStore, TickOutcome,
};

#[tokio::test]
async fn test_unanswered_checkin_escalates_after_three_reminders() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    assert_eq!(checkin.status, CheckinStatus::Pending);
    assert_eq!(h.channel.sent_to("phone-1").len(), 1);

    // Nothing fires before the first window closes.
    assert!(h.advance(4).await.is_empty());

    for expected in 1..=3u8 {
        let outcomes = h.advance(if expected == 1 { 1 } else { 5 }).await;
        assert_eq!(
            outcomes,
            vec![TickOutcome::Snoozed {
                checkin_id: checkin.id,
                snooze_count: expected,
                delivered: true,
            }]
        );
        let current = h.checkin(checkin.id);
        assert_eq!(current.status, CheckinStatus::Snoozed);
        assert_eq!(current.snooze_count, expected);
    }

    let outcomes = h.advance(5).await;
    let [TickOutcome::Escalated { checkin_id, alert_id }] = outcomes.as_slice() else {
        panic!("expected escalation, got {outcomes:?}");
    };
    assert_eq!(*checkin_id, checkin.id);

    let escalated = h.checkin(checkin.id);
    assert_eq!(escalated.status, CheckinStatus::EscalatedNoResponse);
    assert_eq!(escalated.snooze_count, 3);

    let alert = h.db.get_alert(*alert_id).unwrap().unwrap();
    assert_eq!(alert.alert_type, AlertType::NoResponseAfterSnooze);
    assert_eq!(alert.priority, Priority::High);
    assert_eq!(alert.status, AlertStatus::Pending);
    assert_eq!(alert.created_at, at(9, 20));

    // Initial prompt plus three reminders to the user, one alert to moderators.
    assert_eq!(h.channel.sent_to("phone-1").len(), 4);
    let admin = h.channel.sent_to(&format!("org_{ORG}_alerts"));
    assert_eq!(admin.len(), 1);
    assert_eq!(admin[0].message.title, "No Response Alert");

    let logs = h.db.snooze_logs(checkin.id).unwrap();
    let numbers: Vec<u8> = logs.iter().map(|l| l.snooze_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(logs.iter().all(|l| l.notification_delivered));

    // The loop has nothing left to do for this check-in.
    assert_eq!(h.service.scheduler().pending_deadlines(), 0);
    assert!(h.advance(60).await.is_empty());
}

#[tokio::test]
async fn test_answer_makes_pending_deadline_stale() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    h.clock.set(at(9, 2));
    h.service.verify_pin(USER, checkin.id, SAFE_PIN).await.unwrap();

    let outcomes = h.advance(3).await;
    assert_eq!(outcomes, vec![TickOutcome::Stale { checkin_id: checkin.id }]);
    let current = h.checkin(checkin.id);
    assert_eq!(current.status, CheckinStatus::AcknowledgedSafe);
    assert_eq!(current.snooze_count, 0);
    assert!(h.db.alerts_for_checkin(checkin.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_user_snooze_restarts_the_window() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;

    h.clock.set(at(9, 1));
    let response = h.service.snooze(USER, checkin.id).unwrap();
    assert_eq!(response.snooze_count, 1);
    assert_eq!(response.remaining, 2);

    // The 09:05 deadline was armed for count 0 and is now stale.
    h.clock.set(at(9, 5));
    let outcomes = h.service.scheduler().tick(at(9, 5)).await;
    assert_eq!(outcomes, vec![TickOutcome::Stale { checkin_id: checkin.id }]);

    let outcomes = h.advance(1).await;
    assert_eq!(
        outcomes,
        vec![TickOutcome::Snoozed {
            checkin_id: checkin.id,
            snooze_count: 2,
            delivered: true,
        }]
    );

    let logs = h.db.snooze_logs(checkin.id).unwrap();
    assert_eq!(logs.len(), 2);
    assert!(!logs[0].notification_delivered, "user snoozes send nothing");
    assert!(logs[1].notification_delivered);
}

#[tokio::test]
async fn test_snooze_limit() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;

    let remaining: Vec<u8> = (0..3)
        .map(|_| h.service.snooze(USER, checkin.id).unwrap().remaining)
        .collect();
    assert_eq!(remaining, vec![2, 1, 0]);

    let err = h.service.snooze(USER, checkin.id).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Conflict(ConflictError::SnoozeLimit(id)) if id == checkin.id
    ));
    assert_eq!(h.checkin(checkin.id).snooze_count, 3);

    // Answering is still possible after the last snooze.
    h.service.verify_pin(USER, checkin.id, SAFE_PIN).await.unwrap();
    assert_eq!(h.checkin(checkin.id).status, CheckinStatus::AcknowledgedSafe);
}

#[tokio::test]
async fn test_snooze_rejected_after_answer() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    h.service.verify_pin(USER, checkin.id, SAFE_PIN).await.unwrap();

    assert!(matches!(
        h.service.snooze(USER, checkin.id),
        Err(CoreError::Conflict(ConflictError::StaleCheckin { .. }))
    ));
}

#[tokio::test]
async fn test_unregistered_device_is_deactivated() {
    let h = Harness::new().await;
    h.service
        .register_device(USER, "bad-token", Platform::Ios, None)
        .unwrap();
    let checkin = h.due_checkin().await;

    let attempts = h.db.attempts_for_checkin(checkin.id).unwrap();
    assert_eq!(attempts.len(), 2);
    let failed: Vec<_> = attempts
        .iter()
        .filter(|a| a.status == DeliveryStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].channel, "bad-token");
    assert!(failed[0].error.is_some());

    let active: Vec<String> = h
        .db
        .active_devices(USER)
        .unwrap()
        .into_iter()
        .map(|d| d.token)
        .collect();
    assert_eq!(active, vec!["phone-1".to_string()]);

    // The next reminder only goes to the remaining device.
    h.channel.clear();
    h.advance(5).await;
    let targets: Vec<String> = h.channel.sent().into_iter().map(|s| s.target).collect();
    assert_eq!(targets, vec!["phone-1".to_string()]);
}

#[tokio::test]
async fn test_late_start_does_not_fire_immediately() {
    let h = Harness::new().await;
    h.service
        .create_timing(USER, "morning_checkin", "09:00", &["monday"])
        .unwrap();

    h.clock.set(at(9, 30));
    let scheduler = h.service.scheduler();
    let created = scheduler.materialize_due(at(9, 30)).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].scheduled_at, at(9, 0));
    assert_eq!(scheduler.next_deadline(), Some(at(9, 35)));
    assert!(scheduler.tick(at(9, 30)).await.is_empty());

    // Once per timing and day.
    assert!(scheduler.materialize_due(at(9, 31)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_future_and_inactive_timings_are_skipped() {
    let h = Harness::new().await;
    h.service
        .create_timing(USER, "evening_checkin", "18:00", &["monday"])
        .unwrap();
    let weekend = h
        .service
        .create_timing(USER, "weekend_checkin", "08:00", &["saturday"])
        .unwrap();
    let paused = h
        .service
        .create_timing(USER, "early_checkin", "07:00", &["monday"])
        .unwrap();
    h.service.set_timing_active(USER, paused.id, false).unwrap();

    let scheduler = h.service.scheduler();
    assert!(scheduler.materialize_due(at(9, 0)).await.unwrap().is_empty());
    assert_eq!(h.service.timings(USER).unwrap().len(), 3);
    assert!(!weekend.runs_on(at(9, 0).date_naive()));

    let created = scheduler.materialize_due(at(18, 0)).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].scheduled_time, "18:00");
}

#[tokio::test]
async fn test_recovery_rearms_open_checkins() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    h.advance(5).await;
    assert_eq!(h.checkin(checkin.id).snooze_count, 1);

    // A fresh service over the same database has an empty queue.
    let restarted = SafetyService::new(
        h.db.clone(),
        h.channel.clone(),
        h.clock.clone(),
        &common::test_config(),
    )
    .unwrap();
    let scheduler = restarted.scheduler();
    assert_eq!(scheduler.pending_deadlines(), 0);
    assert_eq!(scheduler.recover().unwrap(), 1);
    assert_eq!(scheduler.next_deadline(), Some(at(9, 10)));

    h.clock.set(at(9, 10));
    let outcomes = scheduler.tick(at(9, 10)).await;
    assert_eq!(
        outcomes,
        vec![TickOutcome::Snoozed {
            checkin_id: checkin.id,
            snooze_count: 2,
            delivered: true,
        }]
    );
}

#[tokio::test]
async fn test_today_checkins_reports_counts() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    let today = h.service.today_checkins(USER).unwrap();
    assert_eq!(today.date, at(9, 0).date_naive());
    assert_eq!(today.stats.total, 1);
    assert_eq!(today.stats.pending, 1);

    h.service.verify_pin(USER, checkin.id, SAFE_PIN).await.unwrap();
    let today = h.service.today_checkins(USER).unwrap();
    assert_eq!(today.stats.pending, 0);
    assert_eq!(today.stats.completed, 1);
    assert!(h.service.today_checkins(99).unwrap().checkins.is_empty());
}

#[tokio::test]
async fn test_device_ownership() {
    let h = Harness::new().await;
    h.db.upsert_profile(2, ORG, "Grace Hopper").unwrap();

    assert!(matches!(
        h.service.deactivate_device(2, "phone-1"),
        Err(CoreError::NotFound { entity: "device", .. })
    ));
    h.service.deactivate_device(USER, "phone-1").unwrap();
    assert!(h.db.active_devices(USER).unwrap().is_empty());

    assert!(h.service.register_device(USER, "  ", Platform::Android, None).is_err());
    assert!(h.service.register_device(404, "tok", Platform::Android, None).is_err());
}

#[tokio::test]
async fn test_service_is_shareable_across_threads() {
    let h = Harness::new().await;
    let service: Arc<SafetyService> = Arc::new(h.service);
    let handle = {
        let service = service.clone();
        tokio::spawn(async move { service.today_checkins(USER).map(|t| t.stats.total) })
    };
    assert_eq!(handle.await.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn test_snooze_from_another_process_keeps_escalation_on_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safecheck.db");
    let h = Harness::on_file(&path).await;
    let checkin = h.due_checkin().await;

    // A CLI process snoozes while the loop still holds the 09:05 deadline.
    let other = h.other_process(&path);
    h.clock.set(at(9, 2));
    let snoozed = other.snooze(USER, checkin.id).unwrap();
    assert_eq!(snoozed.snooze_count, 1);

    assert_eq!(
        h.advance(3).await,
        vec![TickOutcome::Rearmed {
            checkin_id: checkin.id,
            at: at(9, 7),
        }]
    );
    assert_eq!(h.service.scheduler().next_deadline(), Some(at(9, 7)));

    for expected in 2..=3u8 {
        let minutes = if expected == 2 { 2 } else { 5 };
        assert_eq!(
            h.advance(minutes).await,
            vec![TickOutcome::Snoozed {
                checkin_id: checkin.id,
                snooze_count: expected,
                delivered: true,
            }]
        );
    }
    let outcomes = h.advance(5).await;
    assert!(matches!(outcomes.as_slice(), [TickOutcome::Escalated { .. }]));

    let escalated = h.checkin(checkin.id);
    assert_eq!(escalated.status, CheckinStatus::EscalatedNoResponse);
    let alerts = h.db.alerts_for_checkin(checkin.id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::NoResponseAfterSnooze);
    assert_eq!(alerts[0].created_at, at(9, 17));
}

#[tokio::test]
async fn test_failed_snooze_log_does_not_strand_the_checkin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safecheck.db");
    let h = Harness::on_file(&path).await;
    let checkin = h.due_checkin().await;
    common::fail_inserts(&path, "snooze_logs", "NEW.snooze_number = 1");

    // The first reminder is counted and sent, but its log entry is refused.
    assert!(h.advance(5).await.is_empty());
    assert_eq!(h.checkin(checkin.id).snooze_count, 1);
    assert_eq!(h.service.scheduler().pending_deadlines(), 1);

    assert_eq!(
        h.advance(5).await,
        vec![TickOutcome::Snoozed {
            checkin_id: checkin.id,
            snooze_count: 2,
            delivered: true,
        }]
    );
    assert!(matches!(
        h.advance(5).await.as_slice(),
        [TickOutcome::Snoozed { snooze_count: 3, .. }]
    ));
    assert!(matches!(
        h.advance(5).await.as_slice(),
        [TickOutcome::Escalated { .. }]
    ));
    assert_eq!(h.checkin(checkin.id).status, CheckinStatus::EscalatedNoResponse);

    let numbers: Vec<u8> = h
        .db
        .snooze_logs(checkin.id)
        .unwrap()
        .iter()
        .map(|l| l.snooze_number)
        .collect();
    assert_eq!(numbers, vec![2, 3]);
}

#[tokio::test]
async fn test_escalation_is_retried_when_its_alert_cannot_be_stored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safecheck.db");
    let h = Harness::on_file(&path).await;
    let checkin = h.due_checkin().await;
    for _ in 0..3 {
        h.advance(5).await;
    }

    common::fail_inserts(&path, "alerts", "1");
    assert!(h.advance(5).await.is_empty());
    let current = h.checkin(checkin.id);
    assert_eq!(current.status, CheckinStatus::Snoozed);
    assert_eq!(current.snooze_count, 3);
    assert!(h.db.alerts_for_checkin(checkin.id).unwrap().is_empty());
    assert_eq!(h.service.scheduler().pending_deadlines(), 1);

    common::allow_inserts(&path, "alerts");
    let outcomes = h.advance(5).await;
    let [TickOutcome::Escalated { alert_id, .. }] = outcomes.as_slice() else {
        panic!("expected escalation, got {outcomes:?}");
    };
    assert_eq!(h.checkin(checkin.id).status, CheckinStatus::EscalatedNoResponse);
    let alert = h.db.get_alert(*alert_id).unwrap().unwrap();
    assert_eq!(alert.created_at, at(9, 25));
}
