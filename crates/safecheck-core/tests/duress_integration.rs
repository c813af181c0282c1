//! Dual-PIN verification: the danger PIN must look exactly like the safe
//! PIN to whoever holds the phone, while moderators get a critical alert.

mod common;

use std::time::{Duration, Instant};

use common::{Harness, DANGER_PIN, ORG, SAFE_PIN, USER};
use safecheck_core::{
    AlertStatus, AlertType, CheckinStatus, ConflictError, CoreError, PinType, Priority,
    SafetyStore, ValidationError,
};

fn shape(response: &safecheck_core::VerifyResponse) -> serde_json::Value {
    let mut json = serde_json::to_value(response).unwrap();
    let obj = json.as_object_mut().unwrap();
    obj.remove("checkin_id");
    obj.remove("timestamp");
    json
}

#[tokio::test]
async fn test_danger_pin_is_indistinguishable_to_the_user() {
    let h = Harness::new().await;
    let first = h.due_checkin().await;
    let safe = h.service.verify_pin(USER, first.id, SAFE_PIN).await.unwrap();

    // Second check-in the same day from another timing.
    let timing = h
        .service
        .create_timing(USER, "second_checkin", "08:30", &["monday"])
        .unwrap();
    let second = h
        .service
        .scheduler()
        .create_checkin(&timing, common::at(9, 0).date_naive(), common::at(9, 0))
        .await
        .unwrap()
        .unwrap();
    h.channel.clear();

    let danger = h.service.verify_pin(USER, second.id, DANGER_PIN).await.unwrap();
    assert_eq!(shape(&safe), shape(&danger));
    assert_eq!(danger.status, "completed");

    // Nothing reached the user's phone because of the danger PIN.
    h.service.drain_background().await;
    assert!(h.channel.sent_to("phone-1").is_empty());

    let stored = h.checkin(second.id);
    assert_eq!(stored.status, CheckinStatus::AcknowledgedDanger);
    assert_eq!(stored.pin_type_used, Some(PinType::Danger));

    let alerts = h.db.alerts_for_checkin(second.id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::DangerPin);
    assert_eq!(alerts[0].priority, Priority::Critical);
    assert_eq!(alerts[0].status, AlertStatus::Pending);

    let admin = h.channel.sent_to(&format!("org_{ORG}_alerts"));
    assert_eq!(admin.len(), 1);
    assert_eq!(admin[0].message.title, "CRITICAL: Danger PIN Entered");
    assert!(admin[0].message.body.contains("Ada Lovelace"));
    assert_eq!(admin[0].message.data["alert_type"], "danger_pin");
}

#[tokio::test]
async fn test_danger_alert_is_stored_before_the_response() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    h.service.verify_pin(USER, checkin.id, DANGER_PIN).await.unwrap();

    // No drain: the alert row exists as soon as verify returns.
    assert_eq!(h.db.alerts_for_checkin(checkin.id).unwrap().len(), 1);
    h.service.drain_background().await;
}

#[tokio::test]
async fn test_second_answer_is_rejected_without_a_second_alert() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;
    h.service.verify_pin(USER, checkin.id, DANGER_PIN).await.unwrap();

    for pin in [DANGER_PIN, SAFE_PIN] {
        let err = h.service.verify_pin(USER, checkin.id, pin).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(ConflictError::StaleCheckin { operation: "verify", .. })
        ));
    }
    h.service.drain_background().await;

    assert_eq!(h.db.alerts_for_checkin(checkin.id).unwrap().len(), 1);
    assert_eq!(h.checkin(checkin.id).status, CheckinStatus::AcknowledgedDanger);
}

#[tokio::test]
async fn test_wrong_pins_are_rejected_without_mutation() {
    let h = Harness::new().await;
    let checkin = h.due_checkin().await;

    assert!(matches!(
        h.service.verify_pin(USER, checkin.id, "9999").await,
        Err(CoreError::InvalidPin)
    ));
    assert!(matches!(
        h.service.verify_pin(USER, checkin.id, "12").await,
        Err(CoreError::Validation(ValidationError::PinFormat))
    ));
    assert!(matches!(
        h.service.verify_pin(USER, 404, SAFE_PIN).await,
        Err(CoreError::NotFound { .. })
    ));

    let current = h.checkin(checkin.id);
    assert_eq!(current.status, CheckinStatus::Pending);
    assert!(current.response_at.is_none());
    assert!(h.db.alerts_for_checkin(checkin.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_other_users_checkin_looks_missing() {
    let h = Harness::new().await;
    h.db.upsert_profile(2, ORG, "Grace Hopper").unwrap();
    h.service.setup_pins(2, SAFE_PIN, DANGER_PIN).await.unwrap();
    let checkin = h.due_checkin().await;

    assert!(matches!(
        h.service.verify_pin(2, checkin.id, SAFE_PIN).await,
        Err(CoreError::NotFound { entity: "checkin", .. })
    ));
    assert!(matches!(
        h.service.snooze(2, checkin.id),
        Err(CoreError::NotFound { entity: "checkin", .. })
    ));
    assert_eq!(h.checkin(checkin.id).status, CheckinStatus::Pending);
}

#[tokio::test]
async fn test_every_outcome_takes_at_least_the_floor() {
    let h = Harness::new().await;
    let floor = Duration::from_millis(common::test_config().security.verify_floor_ms);
    let checkin = h.due_checkin().await;

    for pin in ["9999", "12", DANGER_PIN] {
        let started = Instant::now();
        let _ = h.service.verify_pin(USER, checkin.id, pin).await;
        assert!(started.elapsed() >= floor, "pin {pin} returned early");
    }
    h.service.drain_background().await;
}

#[tokio::test]
async fn test_user_without_pins_gets_invalid_pin() {
    let h = Harness::new().await;
    h.db.upsert_profile(3, ORG, "No Pins").unwrap();
    let timing = h
        .service
        .create_timing(3, "morning_checkin", "09:00", &["monday"])
        .unwrap();
    let checkin = h
        .service
        .scheduler()
        .create_checkin(&timing, common::at(9, 0).date_naive(), common::at(9, 0))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        h.service.verify_pin(3, checkin.id, "1234").await,
        Err(CoreError::InvalidPin)
    ));
}

#[tokio::test]
async fn test_pin_setup_and_rotation() {
    let h = Harness::new().await;

    assert!(matches!(
        h.service.setup_pins(USER, "1111", "2222").await,
        Err(CoreError::Conflict(ConflictError::PinsAlreadySet(USER)))
    ));
    // The danger PIN does not authorise a rotation.
    assert!(matches!(
        h.service.rotate_pins(USER, DANGER_PIN, "1111", "2222").await,
        Err(CoreError::InvalidPin)
    ));
    assert!(matches!(
        h.service.rotate_pins(USER, SAFE_PIN, "5555", "5555").await,
        Err(CoreError::Validation(ValidationError::PinsIdentical))
    ));

    h.service.rotate_pins(USER, SAFE_PIN, "1111", "2222").await.unwrap();
    let checkin = h.due_checkin().await;
    assert!(matches!(
        h.service.verify_pin(USER, checkin.id, SAFE_PIN).await,
        Err(CoreError::InvalidPin)
    ));
    h.service.verify_pin(USER, checkin.id, "1111").await.unwrap();

    let rotations = h
        .db
        .recent_audit(50)
        .unwrap()
        .into_iter()
        .filter(|e| e.action == "pins_configured")
        .count();
    assert_eq!(rotations, 2);
}

#[tokio::test]
async fn test_danger_answer_leaves_no_trace_when_its_alert_cannot_be_stored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safecheck.db");
    let h = Harness::on_file(&path).await;
    let checkin = h.due_checkin().await;
    common::fail_inserts(&path, "alerts", "1");

    let err = h
        .service
        .verify_pin(USER, checkin.id, DANGER_PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Database(_)));
    let current = h.checkin(checkin.id);
    assert_eq!(current.status, CheckinStatus::Pending);
    assert_eq!(current.pin_type_used, None);
    assert!(h.db.alerts_for_checkin(checkin.id).unwrap().is_empty());

    // The same answer goes through once alerts can be stored again.
    common::allow_inserts(&path, "alerts");
    h.service.verify_pin(USER, checkin.id, DANGER_PIN).await.unwrap();
    h.service.drain_background().await;
    assert_eq!(h.checkin(checkin.id).status, CheckinStatus::AcknowledgedDanger);
    let alerts = h.db.alerts_for_checkin(checkin.id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::DangerPin);
}

#[tokio::test]
async fn test_today_view_does_not_reveal_the_danger_pin() {
    let safe = Harness::new().await;
    let checkin = safe.due_checkin().await;
    safe.service.verify_pin(USER, checkin.id, SAFE_PIN).await.unwrap();

    let danger = Harness::new().await;
    let checkin = danger.due_checkin().await;
    danger.service.verify_pin(USER, checkin.id, DANGER_PIN).await.unwrap();
    danger.service.drain_background().await;

    let safe_view = serde_json::to_value(safe.service.today_checkins(USER).unwrap()).unwrap();
    let danger_view = serde_json::to_value(danger.service.today_checkins(USER).unwrap()).unwrap();
    assert_eq!(safe_view, danger_view);
    assert_eq!(danger_view["checkins"][0]["status"], "completed");
    assert_eq!(danger_view["stats"]["completed"], 1);
    let text = danger_view.to_string();
    assert!(!text.contains("danger"));
    assert!(!text.contains("pin_type"));

    // A second answer is refused with the same wording either way.
    let again_safe = safe.service.verify_pin(USER, checkin.id, SAFE_PIN).await.unwrap_err();
    let again_danger = danger
        .service
        .verify_pin(USER, checkin.id, SAFE_PIN)
        .await
        .unwrap_err();
    assert_eq!(again_safe.to_string(), again_danger.to_string());
}
