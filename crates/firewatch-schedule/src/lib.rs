//! Crew scheduling API client for Firewatch.
//!
//! Authenticated requests with a single re-authentication retry, lenient
//! roster types, and the staffing helpers used to present a day's roster.

pub mod client;
pub mod error;
pub mod staffing;
pub mod types;

pub use client::{RequestOptions, ScheduleClient, ScheduleQuery};
pub use error::ScheduleError;
pub use staffing::{expand_station_name, StaffingStatus};
pub use types::{
    Assignment, DayColor, Group, PersonRef, Qualifier, QualifierNeeded, ScheduleDay,
    ScheduleResponse, Shift, User, WorkType,
};
