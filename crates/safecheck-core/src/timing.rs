//! Safety timings: the recurring schedules check-ins are created from.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)(:[0-5]\d)?$").expect("time-of-day pattern is valid")
});

const DAY_NAMES: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

/// Validate a `HH:MM[:SS]` time of day and parse it.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ValidationError> {
    if !TIME_OF_DAY.is_match(s) {
        return Err(ValidationError::TimeFormat(s.to_string()));
    }
    let format = if s.len() == 5 { "%H:%M" } else { "%H:%M:%S" };
    NaiveTime::parse_from_str(s, format).map_err(|_| ValidationError::TimeFormat(s.to_string()))
}

/// Canonical lowercase name of a weekday.
pub fn weekday_name(day: Weekday) -> &'static str {
    DAY_NAMES
        .iter()
        .find(|(_, d)| *d == day)
        .map(|(name, _)| *name)
        .unwrap_or("monday")
}

/// Parse a weekday name, case-insensitively.
pub fn parse_weekday(s: &str) -> Result<Weekday, ValidationError> {
    let lower = s.trim().to_lowercase();
    DAY_NAMES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, day)| *day)
        .ok_or_else(|| ValidationError::Weekday(s.to_string()))
}

/// Set of active weekdays, stored as canonical lowercase names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveDays(BTreeSet<u32>);

impl ActiveDays {
    /// Parse a non-empty list of day names. Duplicates collapse.
    pub fn parse<S: AsRef<str>>(days: &[S]) -> Result<Self, ValidationError> {
        if days.is_empty() {
            return Err(ValidationError::MissingField("active_days"));
        }
        let mut set = BTreeSet::new();
        for day in days {
            set.insert(parse_weekday(day.as_ref())?.num_days_from_monday());
        }
        Ok(Self(set))
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains(&day.num_days_from_monday())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0
            .iter()
            .map(|idx| DAY_NAMES[*idx as usize].0)
            .collect()
    }

    /// JSON array form used by the store.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.names()).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let names: Vec<String> =
            serde_json::from_str(json).map_err(|_| ValidationError::InvalidValue {
                field: "active_days",
                value: json.to_string(),
            })?;
        Self::parse(&names)
    }
}

impl Serialize for ActiveDays {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActiveDays {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        ActiveDays::parse(&names).map_err(serde::de::Error::custom)
    }
}

/// A user's recurring check-in schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyTiming {
    pub id: i64,
    pub user_id: i64,
    pub org_id: i64,
    /// e.g. `morning_checkin`
    pub label: String,
    /// `HH:MM[:SS]`
    pub time: String,
    pub active_days: ActiveDays,
    pub is_active: bool,
}

impl SafetyTiming {
    /// Whether a check-in is due on `date`.
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        self.is_active && self.active_days.contains(date.weekday())
    }

    /// UTC instant this timing fires on `date`.
    pub fn deadline_on(&self, date: NaiveDate) -> Result<DateTime<Utc>, ValidationError> {
        let time = parse_time_of_day(&self.time)?;
        Ok(Utc.from_utc_datetime(&date.and_time(time)))
    }
}

/// Input for creating a timing.
#[derive(Debug, Clone)]
pub struct NewTiming {
    pub user_id: i64,
    pub org_id: i64,
    pub label: String,
    pub time: String,
    pub active_days: ActiveDays,
}

impl NewTiming {
    /// Validate raw input from a client.
    pub fn validate<S: AsRef<str>>(
        user_id: i64,
        org_id: i64,
        label: &str,
        time: &str,
        active_days: &[S],
    ) -> Result<Self, ValidationError> {
        if label.trim().is_empty() {
            return Err(ValidationError::MissingField("label"));
        }
        parse_time_of_day(time)?;
        Ok(Self {
            user_id,
            org_id,
            label: label.trim().to_string(),
            time: time.to_string(),
            active_days: ActiveDays::parse(active_days)?,
        })
    }
}
