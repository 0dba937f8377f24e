//! Scheduling API payloads.
//!
//! Every field is defaulted: the service omits keys freely and we would
//! rather show a partial roster than none.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::staffing::{self, StaffingStatus};

/// `GET /v1/schedule`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Keyed by `YYYY-MM-DD`.
    #[serde(default)]
    pub days: BTreeMap<String, ScheduleDay>,
}

impl ScheduleResponse {
    /// Assignments scheduled on `date`; empty when the day is absent.
    pub fn assignments_for(&self, date: NaiveDate) -> &[Assignment] {
        self.days
            .get(&date.format("%Y-%m-%d").to_string())
            .map(|day| day.assignments.as_slice())
            .unwrap_or(&[])
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days
            .keys()
            .filter_map(|key| NaiveDate::parse_from_str(key, "%Y-%m-%d").ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDay {
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub time_off: Vec<serde_json::Value>,
    #[serde(default)]
    pub callbacks: Vec<serde_json::Value>,
    #[serde(default)]
    pub trades: Vec<serde_json::Value>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub activities: Option<String>,
    #[serde(default)]
    pub day_color: Option<DayColor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayColor {
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub label: String,
}

/// A position to fill, e.g. an engine company for the day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub qualifiers_needed: Vec<QualifierNeeded>,
    #[serde(default)]
    pub minimum_staffing: u32,
    #[serde(default)]
    pub is_finalized: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub shifts: Vec<Shift>,
}

impl Assignment {
    pub fn staffing_status(&self) -> StaffingStatus {
        StaffingStatus::of(self)
    }

    /// Human-readable assignment name, e.g. "Engine 7 (Station 7)".
    pub fn display_name(&self) -> String {
        staffing::expand_station_name(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualifierNeeded {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub shortcode: String,
    #[serde(default)]
    pub minimum_staffing: u32,
}

/// One person working (part of) an assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Hours
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub user: Option<PersonRef>,
    #[serde(default)]
    pub scheduled_by: Option<PersonRef>,
    #[serde(default)]
    pub work_type: Option<WorkType>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub qualifiers: Vec<Qualifier>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Shift {
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.start.as_deref().and_then(parse_timestamp)
    }

    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        self.end.as_deref().and_then(parse_timestamp)
    }

    /// "07:00 - 19:00", in the offset the service reported.
    pub fn time_range(&self) -> Option<String> {
        let start = self.start_time()?;
        let end = self.end_time()?;
        Some(format!("{} - {}", start.format("%H:%M"), end.format("%H:%M")))
    }

    pub fn person_name(&self) -> &str {
        self.user.as_ref().map(|u| u.name.as_str()).unwrap_or("Unassigned")
    }
}

/// Timestamps come either as RFC 3339 or as `YYYY-MM-DD HH:MM:SS` (UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonRef {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Qualifier {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub shortcode: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub label: String,
}

/// `GET /v1/users` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// `GET /v1/work_types` entry; also embedded in shifts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkType {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub work_code: String,
    #[serde(default)]
    pub color: Option<String>,
}
