use std::sync::Arc;

use super::{priority_for, Alert, AlertStatus, AlertType, NewAlert};
use crate::checkin::{CheckIn, Transition};
use crate::clock::Clock;
use crate::error::{ConflictError, CoreError, Result};
use crate::events::{self, Event};
use crate::notify::{
    DeliveryReport, NotificationDispatcher, NotificationKind, NotificationRef, PushMessage,
};
use crate::resolution::Moderator;
use crate::store::{Resolution, SafetyStore};

/// Inputs for raising an alert against a check-in.
#[derive(Debug, Clone, Copy)]
pub struct RaiseContext<'a> {
    pub checkin: &'a CheckIn,
    /// Moderator who caused the alert; `None` for the user or the scheduler.
    pub actor_id: Option<i64>,
    pub initial_status: AlertStatus,
}

impl<'a> RaiseContext<'a> {
    pub fn new(checkin: &'a CheckIn) -> Self {
        Self {
            checkin,
            actor_id: None,
            initial_status: AlertStatus::Pending,
        }
    }

    pub fn by(mut self, moderator_id: i64) -> Self {
        self.actor_id = Some(moderator_id);
        self
    }

    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.initial_status = status;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaisedAlert {
    pub alert: Alert,
    /// False when an existing open danger-PIN alert was returned instead.
    pub created: bool,
}

/// Persists alerts and hands new ones to the dispatcher.
pub struct AlertEngine {
    store: Arc<dyn SafetyStore>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn SafetyStore>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
        }
    }

    fn build(&self, alert_type: AlertType, ctx: &RaiseContext<'_>) -> NewAlert {
        NewAlert {
            checkin_id: ctx.checkin.id,
            user_id: ctx.checkin.user_id,
            org_id: ctx.checkin.org_id,
            alert_type,
            priority: priority_for(alert_type, ctx.checkin.snooze_count),
            status: ctx.initial_status,
            created_at: self.clock.now(),
        }
    }

    fn announce(&self, raised: &RaisedAlert, actor_id: Option<i64>) {
        let alert = &raised.alert;
        if !raised.created {
            tracing::debug!(alert_id = alert.id, "open danger alert already exists");
            return;
        }
        tracing::info!(
            alert_id = alert.id,
            checkin_id = alert.checkin_id,
            alert_type = alert.alert_type.kind_str(),
            priority = alert.priority.as_str(),
            "alert raised"
        );
        events::record(
            self.store.as_ref(),
            actor_id,
            Some(alert.org_id),
            &Event::AlertRaised {
                alert_id: alert.id,
                checkin_id: alert.checkin_id,
                alert_type: alert.alert_type,
                priority: alert.priority,
                at: alert.created_at,
            },
        );
    }

    /// Store an alert without notifying anyone.
    ///
    /// A danger-PIN alert is not duplicated while one is still open for the
    /// same check-in; the open one is returned with `created == false`.
    pub fn record(&self, alert_type: AlertType, ctx: RaiseContext<'_>) -> Result<RaisedAlert> {
        let (alert, created) = self.store.insert_alert_unless_open(&self.build(alert_type, &ctx))?;
        let raised = RaisedAlert { alert, created };
        self.announce(&raised, ctx.actor_id);
        Ok(raised)
    }

    /// Apply `transition` to the check-in and store the alert it causes in
    /// one write. `None` if the check-in had already moved on; then neither
    /// is written.
    pub fn record_with(
        &self,
        transition: &Transition,
        alert_type: AlertType,
        ctx: RaiseContext<'_>,
    ) -> Result<Option<RaisedAlert>> {
        let new = self.build(alert_type, &ctx);
        let Some((alert, created)) = self
            .store
            .transition_and_raise(ctx.checkin.id, transition, &new)?
        else {
            return Ok(None);
        };
        let raised = RaisedAlert { alert, created };
        self.announce(&raised, ctx.actor_id);
        Ok(Some(raised))
    }

    /// Push an alert to the organisation's moderators.
    pub async fn notify(&self, alert: &Alert) -> DeliveryReport {
        let user_name = match self.store.get_profile(alert.user_id) {
            Ok(Some(profile)) => profile.full_name,
            Ok(None) => format!("User {}", alert.user_id),
            Err(e) => {
                tracing::warn!(error = %e, "cannot load profile for alert message");
                format!("User {}", alert.user_id)
            }
        };
        let reference = NotificationRef {
            checkin_id: alert.checkin_id,
            alert_id: Some(alert.id),
            user_id: alert.user_id,
            kind: NotificationKind::AdminAlert,
        };
        let message = PushMessage::admin_alert(alert, &user_name);
        let report = self
            .dispatcher
            .fan_out_to_org(alert.org_id, reference, &message)
            .await;
        if !report.is_delivered() {
            tracing::warn!(alert_id = alert.id, "alert notification not delivered");
        }
        report
    }

    /// Record, then notify if the alert is new. Delivery failure never
    /// undoes the stored alert.
    pub async fn raise(&self, alert_type: AlertType, ctx: RaiseContext<'_>) -> Result<RaisedAlert> {
        let raised = self.record(alert_type, ctx)?;
        if raised.created {
            self.notify(&raised.alert).await;
        }
        Ok(raised)
    }

    /// [`record_with`](Self::record_with), then notify if the alert is new.
    pub async fn raise_with(
        &self,
        transition: &Transition,
        alert_type: AlertType,
        ctx: RaiseContext<'_>,
    ) -> Result<Option<RaisedAlert>> {
        let raised = self.record_with(transition, alert_type, ctx)?;
        if let Some(r) = raised.as_ref().filter(|r| r.created) {
            self.notify(&r.alert).await;
        }
        Ok(raised)
    }

    /// Moderator status change on one alert.
    pub fn update_status(
        &self,
        moderator: Moderator,
        alert_id: i64,
        to: AlertStatus,
        notes: Option<&str>,
    ) -> Result<Alert> {
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or(CoreError::NotFound {
                entity: "alert",
                id: alert_id,
            })?;
        moderator.authorize("alert", alert.id, alert.org_id)?;

        let rejected = |current: AlertStatus| -> CoreError {
            if current.is_terminal() {
                ConflictError::AlertClosed {
                    alert_id,
                    status: current.to_string(),
                }
                .into()
            } else {
                ConflictError::AlertTransition {
                    alert_id,
                    from: current.to_string(),
                    to: to.to_string(),
                }
                .into()
            }
        };
        if !to.allowed_from().contains(&alert.status) {
            return Err(rejected(alert.status));
        }

        let at = self.clock.now();
        let applied = self.store.update_alert_status(
            alert_id,
            to,
            Resolution {
                moderator_id: moderator.id,
                at,
                notes,
            },
        )?;
        let current = self
            .store
            .get_alert(alert_id)?
            .ok_or(CoreError::NotFound {
                entity: "alert",
                id: alert_id,
            })?;
        if !applied {
            return Err(rejected(current.status));
        }

        tracing::info!(alert_id, from = %alert.status, to = %to, moderator_id = moderator.id, "alert status changed");
        events::record(
            self.store.as_ref(),
            Some(moderator.id),
            Some(alert.org_id),
            &Event::AlertStatusChanged {
                alert_id,
                from: alert.status,
                to,
                moderator_id: moderator.id,
                at,
            },
        );
        Ok(current)
    }
}
