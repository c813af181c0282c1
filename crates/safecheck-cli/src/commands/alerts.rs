use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use safecheck_core::{AlertStatus, CallOutcome, EscalationTarget, Moderator};
use serde_json::json;

use super::{print_json, CmdResult, Context};

/// Identity of the acting moderator.
#[derive(Args)]
pub struct ModeratorArgs {
    #[arg(long = "moderator")]
    pub id: i64,
    #[arg(long = "org")]
    pub org_id: i64,
}

impl From<&ModeratorArgs> for Moderator {
    fn from(args: &ModeratorArgs) -> Self {
        Moderator {
            id: args.id,
            org_id: args.org_id,
        }
    }
}

#[derive(Subcommand)]
pub enum AlertsAction {
    /// Open alerts of the organisation, critical first
    List {
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
    /// Full incident history behind an alert
    Timeline {
        alert_id: i64,
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
    /// Resolved incidents, most recently resolved first
    Resolved {
        /// Earliest resolution: YYYY-MM-DD or an RFC 3339 time
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Latest resolution: YYYY-MM-DD (whole day) or an RFC 3339 time
        #[arg(long, requires = "from")]
        to: Option<String>,
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
    /// Acknowledge, start, or close an alert
    Status {
        alert_id: i64,
        /// acknowledged, in_progress, resolved or false_alarm
        status: String,
        #[arg(long)]
        notes: Option<String>,
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
    /// Log a call to the user
    Call {
        alert_id: i64,
        /// initiated, ringing, attended_safe, attended_not_safe, not_attended or failed
        outcome: String,
        /// Call length in seconds
        #[arg(long)]
        duration: Option<u32>,
        #[arg(long)]
        notes: Option<String>,
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
    /// Hand the incident to police, family or an administrator
    Escalate {
        checkin_id: i64,
        /// police, family or admin
        target: String,
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
    /// Close a check-in and all its alerts
    Resolve {
        checkin_id: i64,
        #[arg(long)]
        notes: Option<String>,
        #[command(flatten)]
        moderator: ModeratorArgs,
    },
}

pub async fn run(action: AlertsAction) -> CmdResult {
    let ctx = Context::open()?;
    let service = &ctx.service;
    match action {
        AlertsAction::List { moderator } => {
            print_json(&service.active_alerts((&moderator).into())?)?;
        }
        AlertsAction::Timeline {
            alert_id,
            moderator,
        } => {
            print_json(&service.alert_timeline((&moderator).into(), alert_id)?)?;
        }
        AlertsAction::Resolved {
            from,
            to,
            moderator,
        } => {
            let range = match (from, to) {
                (Some(from), Some(to)) => Some((bound(&from, false)?, bound(&to, true)?)),
                _ => None,
            };
            let incidents = service.resolved_incidents((&moderator).into(), range)?;
            print_json(&json!({ "total": incidents.len(), "incidents": incidents }))?;
        }
        AlertsAction::Status {
            alert_id,
            status,
            notes,
            moderator,
        } => {
            let to = AlertStatus::parse(&status)?;
            let alert =
                service.update_alert_status((&moderator).into(), alert_id, to, notes.as_deref())?;
            print_json(&alert)?;
        }
        AlertsAction::Call {
            alert_id,
            outcome,
            duration,
            notes,
            moderator,
        } => {
            let outcome = CallOutcome::parse(&outcome)?;
            let result = service
                .log_call((&moderator).into(), alert_id, outcome, duration, notes)
                .await?;
            print_json(&result)?;
        }
        AlertsAction::Escalate {
            checkin_id,
            target,
            moderator,
        } => {
            let target = EscalationTarget::parse(&target)?;
            let alert = service
                .escalate((&moderator).into(), checkin_id, target)
                .await?;
            print_json(&alert)?;
        }
        AlertsAction::Resolve {
            checkin_id,
            notes,
            moderator,
        } => {
            let outcome = service.resolve((&moderator).into(), checkin_id, notes.as_deref())?;
            print_json(&outcome)?;
        }
    }
    Ok(())
}

/// A range bound. A bare date covers that whole UTC day.
fn bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{raw}': expected YYYY-MM-DD or RFC 3339"))?;
    let time = if end_of_day {
        date.and_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc()).ok_or_else(|| format!("invalid date '{raw}'"))
}
