//! Moderator actions on an incident: call logging, escalation, resolution.
//!
//! Resolution is the only way a check-in reaches its terminal state, and it
//! closes every open alert of the check-in in the same transaction. Two
//! moderators resolving at once produce one resolution; the loser sees
//! [`ResolveOutcome::AlreadyResolved`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{
    Alert, AlertEngine, AlertStatus, AlertType, EscalationTarget, ManualReason, RaiseContext,
};
use crate::checkin::{CheckIn, CheckinStatus, Transition};
use crate::clock::Clock;
use crate::error::{ConflictError, CoreError, Result, ValidationError};
use crate::events::{self, Event};
use crate::store::{Resolution, ResolveOutcome, SafetyStore};

/// An authenticated moderator. Identity is issued outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moderator {
    pub id: i64,
    pub org_id: i64,
}

impl Moderator {
    /// Reject access to records of another organisation.
    pub fn authorize(self, entity: &'static str, id: i64, org_id: i64) -> Result<()> {
        if self.org_id == org_id {
            Ok(())
        } else {
            tracing::warn!(moderator_id = self.id, entity, id, "cross-organisation access denied");
            Err(CoreError::Unauthorized {
                moderator_id: self.id,
                entity,
                id,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Initiated,
    Ringing,
    AttendedSafe,
    AttendedNotSafe,
    NotAttended,
    Failed,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Initiated => "initiated",
            CallOutcome::Ringing => "ringing",
            CallOutcome::AttendedSafe => "attended_safe",
            CallOutcome::AttendedNotSafe => "attended_not_safe",
            CallOutcome::NotAttended => "not_attended",
            CallOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, ValidationError> {
        match s {
            "initiated" => Ok(CallOutcome::Initiated),
            "ringing" => Ok(CallOutcome::Ringing),
            "attended_safe" => Ok(CallOutcome::AttendedSafe),
            "attended_not_safe" => Ok(CallOutcome::AttendedNotSafe),
            "not_attended" => Ok(CallOutcome::NotAttended),
            "failed" => Ok(CallOutcome::Failed),
            other => Err(ValidationError::InvalidValue {
                field: "call_outcome",
                value: other.to_string(),
            }),
        }
    }

    /// Outcomes that change the incident beyond the log entry.
    fn acts_on_checkin(self) -> bool {
        matches!(
            self,
            CallOutcome::AttendedNotSafe | CallOutcome::NotAttended | CallOutcome::Failed
        )
    }
}

/// A moderator's call to the monitored user. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub id: i64,
    pub alert_id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    pub called_at: DateTime<Utc>,
    pub outcome: CallOutcome,
    pub duration_secs: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub alert_id: i64,
    pub admin_id: i64,
    pub user_id: i64,
    pub called_at: DateTime<Utc>,
    pub outcome: CallOutcome,
    pub duration_secs: Option<u32>,
    pub notes: Option<String>,
}

/// Everything a logged call caused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallResult {
    pub call: CallLog,
    /// Alert raised by a `not safe`, `not attended` or `failed` outcome.
    pub raised: Option<Alert>,
    /// Set for `attended_safe`.
    pub resolved: Option<ResolveOutcome>,
}

pub struct ResolutionCoordinator {
    store: Arc<dyn SafetyStore>,
    alerts: Arc<AlertEngine>,
    clock: Arc<dyn Clock>,
}

impl ResolutionCoordinator {
    pub fn new(store: Arc<dyn SafetyStore>, alerts: Arc<AlertEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            alerts,
            clock,
        }
    }

    fn load_checkin(&self, id: i64) -> Result<CheckIn> {
        self.store
            .get_checkin(id)?
            .ok_or(CoreError::NotFound {
                entity: "checkin",
                id,
            })
    }

    fn stale(checkin: &CheckIn, operation: &'static str) -> CoreError {
        ConflictError::StaleCheckin {
            checkin_id: checkin.id,
            status: checkin.status.to_string(),
            operation,
        }
        .into()
    }

    /// Move the check-in to `acknowledged_danger` on moderator evidence and
    /// raise the alert that records it, in one write.
    async fn mark_danger(
        &self,
        checkin: &mut CheckIn,
        alert_type: AlertType,
        initial_status: AlertStatus,
        moderator: Moderator,
        operation: &'static str,
    ) -> Result<Alert> {
        let transition = Transition::MarkDanger {
            at: self.clock.now(),
        };
        let ctx = RaiseContext::new(checkin)
            .by(moderator.id)
            .with_status(initial_status);
        let Some(raised) = self.alerts.raise_with(&transition, alert_type, ctx).await? else {
            let current = self.load_checkin(checkin.id)?;
            return Err(Self::stale(&current, operation));
        };
        transition.apply(checkin);
        Ok(raised.alert)
    }

    /// Record a call and act on its outcome.
    pub async fn log_call(
        &self,
        moderator: Moderator,
        alert_id: i64,
        outcome: CallOutcome,
        duration_secs: Option<u32>,
        notes: Option<String>,
    ) -> Result<CallResult> {
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or(CoreError::NotFound {
                entity: "alert",
                id: alert_id,
            })?;
        moderator.authorize("alert", alert.id, alert.org_id)?;
        let mut checkin = self.load_checkin(alert.checkin_id)?;
        if checkin.status.is_terminal() && outcome.acts_on_checkin() {
            return Err(Self::stale(&checkin, "log call"));
        }

        let call = self.store.insert_call_log(&NewCallLog {
            alert_id,
            admin_id: moderator.id,
            user_id: alert.user_id,
            called_at: self.clock.now(),
            outcome,
            duration_secs,
            notes: notes.clone(),
        })?;
        tracing::info!(call_id = call.id, alert_id, outcome = outcome.as_str(), "call logged");
        events::record(
            self.store.as_ref(),
            Some(moderator.id),
            Some(alert.org_id),
            &Event::CallLogged {
                call_id: call.id,
                alert_id,
                moderator_id: moderator.id,
                outcome,
                at: call.called_at,
            },
        );

        let mut result = CallResult {
            call,
            raised: None,
            resolved: None,
        };
        match outcome {
            CallOutcome::AttendedSafe => {
                result.resolved = Some(self.resolve_loaded(moderator, &checkin, notes.as_deref())?);
            }
            CallOutcome::AttendedNotSafe | CallOutcome::NotAttended => {
                let alert = self
                    .mark_danger(
                        &mut checkin,
                        AlertType::Manual {
                            reason: ManualReason::CallOutcome,
                        },
                        AlertStatus::Pending,
                        moderator,
                        "log call",
                    )
                    .await?;
                result.raised = Some(alert);
            }
            CallOutcome::Failed => {
                let raised = self
                    .alerts
                    .raise(AlertType::CallFailed, RaiseContext::new(&checkin).by(moderator.id))
                    .await?;
                result.raised = Some(raised.alert);
            }
            CallOutcome::Initiated | CallOutcome::Ringing => {}
        }
        Ok(result)
    }

    /// Close the check-in and all its open alerts. Idempotent.
    pub fn resolve(
        &self,
        moderator: Moderator,
        checkin_id: i64,
        notes: Option<&str>,
    ) -> Result<ResolveOutcome> {
        let checkin = self.load_checkin(checkin_id)?;
        moderator.authorize("checkin", checkin.id, checkin.org_id)?;
        self.resolve_loaded(moderator, &checkin, notes)
    }

    fn resolve_loaded(
        &self,
        moderator: Moderator,
        checkin: &CheckIn,
        notes: Option<&str>,
    ) -> Result<ResolveOutcome> {
        if checkin.status == CheckinStatus::Resolved {
            tracing::debug!(checkin_id = checkin.id, "already resolved");
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        let at = self.clock.now();
        let outcome = self.store.resolve_checkin(
            checkin.id,
            Resolution {
                moderator_id: moderator.id,
                at,
                notes,
            },
        )?;
        match outcome {
            ResolveOutcome::Resolved { alerts_closed } => {
                tracing::info!(
                    checkin_id = checkin.id,
                    moderator_id = moderator.id,
                    alerts_closed,
                    "check-in resolved"
                );
                events::record(
                    self.store.as_ref(),
                    Some(moderator.id),
                    Some(checkin.org_id),
                    &Event::CheckinResolved {
                        checkin_id: checkin.id,
                        moderator_id: moderator.id,
                        alerts_closed,
                        at,
                    },
                );
            }
            ResolveOutcome::AlreadyResolved => {
                tracing::debug!(checkin_id = checkin.id, "lost resolve race");
            }
        }
        Ok(outcome)
    }

    /// Hand the incident to an outside party. Never resolves.
    pub async fn escalate(
        &self,
        moderator: Moderator,
        checkin_id: i64,
        target: EscalationTarget,
    ) -> Result<Alert> {
        let mut checkin = self.load_checkin(checkin_id)?;
        moderator.authorize("checkin", checkin.id, checkin.org_id)?;
        if checkin.status.is_terminal() {
            return Err(Self::stale(&checkin, "escalate"));
        }
        let alert = self
            .mark_danger(
                &mut checkin,
                AlertType::Manual {
                    reason: ManualReason::Escalation(target),
                },
                AlertStatus::InProgress,
                moderator,
                "escalate",
            )
            .await?;
        tracing::info!(
            checkin_id,
            target = target.as_str(),
            alert_id = alert.id,
            "incident escalated"
        );
        Ok(alert)
    }
}
