//! # SafeCheck Core Library
//!
//! Check-in lifecycle and duress escalation engine for a workplace safety
//! service. Monitored users confirm scheduled check-ins with a safe PIN or
//! a covert danger PIN; unanswered check-ins are reminded and escalated;
//! moderators work the resulting alerts to resolution.
//!
//! ## Architecture
//!
//! - **Check-in state machine**: compare-and-set transitions over a closed
//!   status set, so concurrent responders, the scheduler and moderators
//!   cannot overwrite each other
//! - **Scheduler**: a deadline queue that sends reminders, escalates after
//!   the third, and creates each day's check-ins from the user's timings
//! - **Alerts**: one open danger alert per check-in, fanned out to the
//!   organisation's moderators
//! - **Storage**: SQLite persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`SafetyService`]: the operations exposed to mobile and moderator clients
//! - [`Scheduler`]: reminder and escalation loop
//! - [`SafetyDb`]: SQLite implementation of [`SafetyStore`]
//! - [`Config`]: application configuration management

pub mod alert;
pub mod checkin;
pub mod clock;
pub mod credential;
pub mod error;
pub mod events;
pub mod notify;
pub mod resolution;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod timeline;
pub mod timing;

pub use alert::{Alert, AlertStatus, AlertType, EscalationTarget, Priority};
pub use checkin::{
    CheckIn, CheckinStatus, DayStats, MobileCheckIn, MobileStatus, PinType, MAX_SNOOZES,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{PinVerifier, UserProfile};
pub use error::{ConfigError, ConflictError, CoreError, DatabaseError, ValidationError};
pub use events::{AuditEntry, Event};
pub use notify::{Device, FcmChannel, LogChannel, Platform, PushChannel};
pub use resolution::{CallOutcome, Moderator};
pub use scheduler::{Scheduler, TickOutcome};
pub use service::{SafetyService, SnoozeResponse, TodayCheckins, VerifyResponse};
pub use storage::{Config, SafetyDb};
pub use store::{ResolveOutcome, SafetyStore};
pub use timeline::{IncidentTimeline, ResolutionType, ResolvedIncident, TimelineEntry};
pub use timing::SafetyTiming;
