//! Unit conversions and classifications used to present readings.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

pub fn celsius_to_fahrenheit(celsius: f64) -> i64 {
    (celsius * 9.0 / 5.0 + 32.0).round() as i64
}

pub fn ms_to_mph(ms: f64) -> i64 {
    (ms * 2.237).round() as i64
}

pub fn km_to_miles(km: f64) -> i64 {
    (km * 0.621_371).round() as i64
}

/// 16-point compass label; each point covers 22.5° centred on its bearing.
pub fn degrees_to_cardinal(degrees: f64) -> &'static str {
    let index = (degrees / 22.5).round() as i64;
    COMPASS_POINTS[index.rem_euclid(16) as usize]
}

/// Sky condition from cloud cover percentage.
pub fn cloud_condition(cloud_cover: f64) -> &'static str {
    if cloud_cover <= 10.0 {
        "Clear"
    } else if cloud_cover <= 30.0 {
        "Mostly Clear"
    } else if cloud_cover <= 60.0 {
        "Partly Cloudy"
    } else if cloud_cover <= 90.0 {
        "Mostly Cloudy"
    } else {
        "Overcast"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FireDanger {
    Low,
    Moderate,
    High,
    Extreme,
}

impl FireDanger {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Extreme => "EXTREME",
        }
    }
}

impl std::fmt::Display for FireDanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fire danger from district averages. First matching rule wins.
pub fn fire_danger(temperature_f: f64, humidity: f64, wind_mph: f64) -> FireDanger {
    if temperature_f > 80.0 && humidity < 30.0 && wind_mph > 15.0 {
        FireDanger::Extreme
    } else if temperature_f > 75.0 && humidity < 40.0 && wind_mph > 10.0 {
        FireDanger::High
    } else if temperature_f > 70.0 && humidity < 50.0 {
        FireDanger::Moderate
    } else {
        FireDanger::Low
    }
}

/// "Just now", "5 minutes ago", "2 hours ago".
pub fn format_relative(elapsed: Duration) -> String {
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{} minute{} ago", minutes, if minutes > 1 { "s" } else { "" });
    }
    let hours = minutes / 60;
    format!("{} hour{} ago", hours, if hours > 1 { "s" } else { "" })
}

/// e.g. "Aug 01, 2025 13:05:00 PDT"
pub fn format_in_zone(instant: DateTime<Utc>, zone: Tz) -> String {
    instant
        .with_timezone(&zone)
        .format("%b %d, %Y %H:%M:%S %Z")
        .to_string()
}
