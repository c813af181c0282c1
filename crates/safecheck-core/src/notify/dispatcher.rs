use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;

use super::{
    org_topic, DeliveryStatus, NewNotificationAttempt, NotificationRef, PushChannel, PushMessage,
    PushTarget,
};
use crate::clock::Clock;
use crate::error::DeliveryError;
use crate::storage::NotificationsConfig;
use crate::store::SafetyStore;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub max_concurrent_sends: usize,
    pub send_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        (&NotificationsConfig::default()).into()
    }
}

impl From<&NotificationsConfig> for DispatcherConfig {
    fn from(cfg: &NotificationsConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            max_concurrent_sends: cfg.max_concurrent_sends.max(1),
            send_timeout: cfg.send_timeout(),
        }
    }
}

/// Aggregate outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Channel labels (token or topic) that accepted the message.
    pub successes: Vec<String>,
    /// Channel label and error text for each failed send.
    pub failures: Vec<(String, String)>,
}

impl DeliveryReport {
    /// At least one channel accepted the message.
    pub fn is_delivered(&self) -> bool {
        !self.successes.is_empty()
    }
}

/// Sends one message to many targets and records every attempt.
pub struct NotificationDispatcher {
    store: Arc<dyn SafetyStore>,
    channel: Arc<dyn PushChannel>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn SafetyStore>,
        channel: Arc<dyn PushChannel>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            channel,
            clock,
            config,
        }
    }

    /// Send to every active device of `reference.user_id`.
    pub async fn fan_out_to_user(
        &self,
        reference: NotificationRef,
        message: &PushMessage,
    ) -> DeliveryReport {
        let devices = match self.store.active_devices(reference.user_id) {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(user_id = reference.user_id, error = %e, "cannot load devices");
                return DeliveryReport::default();
            }
        };
        if devices.is_empty() {
            tracing::debug!(user_id = reference.user_id, "no active devices");
        }
        let targets = devices
            .into_iter()
            .map(|d| PushTarget::Device(d.token))
            .collect();
        self.send_all(reference, targets, message).await
    }

    /// Send to the organisation's moderator topic.
    pub async fn fan_out_to_org(
        &self,
        org_id: i64,
        reference: NotificationRef,
        message: &PushMessage,
    ) -> DeliveryReport {
        let targets = vec![PushTarget::Topic(org_topic(org_id))];
        self.send_all(reference, targets, message).await
    }

    async fn send_all(
        &self,
        reference: NotificationRef,
        targets: Vec<PushTarget>,
        message: &PushMessage,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if !self.config.enabled {
            tracing::debug!(kind = %reference.kind.as_string(), "notifications disabled");
            return report;
        }

        let semaphore = Semaphore::new(self.config.max_concurrent_sends);
        let timeout = self.config.send_timeout;
        let mut pending = FuturesUnordered::new();

        for target in targets {
            let semaphore = &semaphore;
            let channel = &self.channel;
            pending.push(async move {
                let _permit = semaphore.acquire().await.ok();
                let outcome = match tokio::time::timeout(timeout, channel.send(&target, message))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(DeliveryError::Timeout(timeout.as_millis() as u64)),
                };
                (target, outcome)
            });
        }

        while let Some((target, outcome)) = pending.next().await {
            let label = target.label().to_string();
            let (status, error) = match outcome {
                Ok(_) => {
                    report.successes.push(label.clone());
                    (DeliveryStatus::Sent, None)
                }
                Err(err) => {
                    tracing::warn!(
                        channel = self.channel.name(),
                        target_label = %label,
                        error = %err,
                        "push send failed"
                    );
                    if let (DeliveryError::Unregistered, PushTarget::Device(token)) = (&err, &target)
                    {
                        self.deactivate(token);
                    }
                    report.failures.push((label.clone(), err.to_string()));
                    (DeliveryStatus::Failed, Some(err.to_string()))
                }
            };
            let attempt = NewNotificationAttempt {
                reference,
                channel: label,
                sent_at: self.clock.now(),
                status,
                error,
            };
            if let Err(e) = self.store.record_attempt(&attempt) {
                tracing::warn!(error = %e, "failed to record notification attempt");
            }
        }

        report
    }

    fn deactivate(&self, token: &str) {
        match self.store.deactivate_device(token) {
            Ok(true) => tracing::info!("deactivated unregistered device token"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "failed to deactivate device token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::notify::{Device, NotificationKind, Platform};
    use crate::storage::SafetyDb;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Fails `bad*` tokens as unregistered and never answers for `slow*`.
    struct ScriptedChannel;

    #[async_trait]
    impl PushChannel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            target: &PushTarget,
            _message: &PushMessage,
        ) -> Result<String, DeliveryError> {
            let label = target.label();
            if label.starts_with("bad") {
                Err(DeliveryError::Unregistered)
            } else if label.starts_with("slow") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("late".into())
            } else {
                Ok(format!("msg-{label}"))
            }
        }
    }

    fn setup(tokens: &[&str]) -> (Arc<SafetyDb>, NotificationDispatcher) {
        let db = Arc::new(SafetyDb::open_memory().unwrap());
        db.upsert_profile(1, 10, "Ada").unwrap();
        for token in tokens {
            db.upsert_device(&Device {
                user_id: 1,
                token: token.to_string(),
                platform: Platform::Android,
                name: None,
                is_active: true,
                last_used_at: Utc::now(),
            })
            .unwrap();
        }
        let dispatcher = NotificationDispatcher::new(
            db.clone(),
            Arc::new(ScriptedChannel),
            Arc::new(SystemClock),
            DispatcherConfig {
                enabled: true,
                max_concurrent_sends: 2,
                send_timeout: Duration::from_millis(200),
            },
        );
        (db, dispatcher)
    }

    fn reference() -> NotificationRef {
        NotificationRef {
            checkin_id: 0,
            alert_id: None,
            user_id: 1,
            kind: NotificationKind::InitialCheckin,
        }
    }

    #[tokio::test]
    async fn partial_failure_still_delivered() {
        let (db, dispatcher) = setup(&["good-1", "bad-1"]);
        let report = dispatcher
            .fan_out_to_user(reference(), &PushMessage::checkin_due(0, "m", "08:00"))
            .await;
        assert!(report.is_delivered());
        assert_eq!(report.successes, vec!["good-1".to_string()]);
        assert_eq!(report.failures.len(), 1);

        let remaining = db.active_devices(1).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, "good-1");
        assert_eq!(db.attempts_for_checkin(0).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_recorded_failure() {
        let (db, dispatcher) = setup(&["slow-1"]);
        let report = dispatcher
            .fan_out_to_user(reference(), &PushMessage::checkin_due(0, "m", "08:00"))
            .await;
        assert!(!report.is_delivered());
        assert!(report.failures[0].1.contains("timed out"));
        let attempts = db.attempts_for_checkin(0).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn org_fan_out_uses_topic() {
        let (db, dispatcher) = setup(&[]);
        let report = dispatcher
            .fan_out_to_org(10, reference(), &PushMessage::checkin_due(0, "m", "08:00"))
            .await;
        assert_eq!(report.successes, vec!["org_10_alerts".to_string()]);
        assert_eq!(db.attempts_for_checkin(0).unwrap()[0].channel, "org_10_alerts");
    }

    #[tokio::test]
    async fn no_devices_means_not_delivered() {
        let (_db, dispatcher) = setup(&[]);
        let report = dispatcher
            .fan_out_to_user(reference(), &PushMessage::checkin_due(0, "m", "08:00"))
            .await;
        assert!(!report.is_delivered());
        assert!(report.failures.is_empty());
    }
}
