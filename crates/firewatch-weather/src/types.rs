use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use firewatch_core::StationConfig;
use serde::{Deserialize, Serialize};

use crate::conditions::{self, FireDanger};

/// A weather station the cache refills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Station {
    pub fn new(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lng,
        }
    }
}

impl From<&StationConfig> for Station {
    fn from(config: &StationConfig) -> Self {
        Self::new(config.name.clone(), config.lat, config.lng)
    }
}

/// One station's observation, in the provider's source units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReading {
    pub location: String,
    /// °C
    pub air_temperature: f64,
    /// %
    pub humidity: f64,
    /// m/s
    pub wind_speed: f64,
    /// degrees, 0–360
    pub wind_direction: f64,
    /// km
    pub visibility: f64,
    /// %
    pub cloud_cover: f64,
    #[serde(rename = "time")]
    pub observed_at: DateTime<Utc>,
}

impl WeatherReading {
    pub fn temperature_f(&self) -> i64 {
        conditions::celsius_to_fahrenheit(self.air_temperature)
    }

    pub fn wind_mph(&self) -> i64 {
        conditions::ms_to_mph(self.wind_speed)
    }

    pub fn wind_cardinal(&self) -> &'static str {
        conditions::degrees_to_cardinal(self.wind_direction)
    }

    pub fn sky(&self) -> &'static str {
        conditions::cloud_condition(self.cloud_cover)
    }

    pub fn visibility_miles(&self) -> i64 {
        conditions::km_to_miles(self.visibility)
    }
}

/// A station's slot in the snapshot.
///
/// `Unavailable` means the last fetch for this station failed; it is stored
/// as `null` so other readers of the shared document see the same thing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<WeatherReading>", into = "Option<WeatherReading>")]
pub enum StationReading {
    Available(WeatherReading),
    #[default]
    Unavailable,
}

impl StationReading {
    pub fn is_available(&self) -> bool {
        matches!(self, StationReading::Available(_))
    }

    pub fn as_reading(&self) -> Option<&WeatherReading> {
        match self {
            StationReading::Available(reading) => Some(reading),
            StationReading::Unavailable => None,
        }
    }
}

impl From<Option<WeatherReading>> for StationReading {
    fn from(reading: Option<WeatherReading>) -> Self {
        match reading {
            Some(reading) => StationReading::Available(reading),
            None => StationReading::Unavailable,
        }
    }
}

impl From<StationReading> for Option<WeatherReading> {
    fn from(reading: StationReading) -> Self {
        match reading {
            StationReading::Available(reading) => Some(reading),
            StationReading::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEntry {
    #[serde(default)]
    pub weather_data: StationReading,
    pub last_updated: DateTime<Utc>,
}

/// The whole cached snapshot: every station plus one shared fetch instant.
///
/// Written as a unit; a refill replaces the document, never merges into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDocument {
    pub locations: BTreeMap<String, LocationEntry>,
    pub last_fetch: DateTime<Utc>,
}

impl CacheDocument {
    /// Build a snapshot stamped with a single fetch instant.
    pub fn from_readings<I>(readings: I, fetched_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (String, StationReading)>,
    {
        let locations = readings
            .into_iter()
            .map(|(name, reading)| {
                (
                    name,
                    LocationEntry {
                        weather_data: reading,
                        last_updated: fetched_at,
                    },
                )
            })
            .collect();

        Self {
            locations,
            last_fetch: fetched_at,
        }
    }

    pub fn reading(&self, location: &str) -> Option<&StationReading> {
        self.locations.get(location).map(|entry| &entry.weather_data)
    }

    /// Every station's reading, ordered by station name.
    pub fn readings(&self) -> impl Iterator<Item = (&str, &StationReading)> {
        self.locations
            .iter()
            .map(|(name, entry)| (name.as_str(), &entry.weather_data))
    }

    pub fn available_count(&self) -> usize {
        self.locations
            .values()
            .filter(|entry| entry.weather_data.is_available())
            .count()
    }

    pub fn unavailable_count(&self) -> usize {
        self.locations.len() - self.available_count()
    }

    /// District-wide averages over the stations that reported, with the
    /// fire-danger level they imply. `None` when no station reported.
    pub fn conditions_summary(&self) -> Option<ConditionsSummary> {
        let readings: Vec<&WeatherReading> = self
            .locations
            .values()
            .filter_map(|entry| entry.weather_data.as_reading())
            .collect();

        if readings.is_empty() {
            return None;
        }

        let n = readings.len() as f64;
        let avg_temperature_f = readings.iter().map(|r| r.temperature_f() as f64).sum::<f64>() / n;
        let avg_humidity = readings.iter().map(|r| r.humidity).sum::<f64>() / n;
        let avg_wind_mph = readings.iter().map(|r| r.wind_mph() as f64).sum::<f64>() / n;

        Some(ConditionsSummary {
            stations_reporting: readings.len(),
            avg_temperature_f,
            avg_humidity,
            avg_wind_mph,
            fire_danger: conditions::fire_danger(avg_temperature_f, avg_humidity, avg_wind_mph),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionsSummary {
    pub stations_reporting: usize,
    pub avg_temperature_f: f64,
    pub avg_humidity: f64,
    pub avg_wind_mph: f64,
    pub fire_danger: FireDanger,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use chrono::TimeZone;

    fn reading(location: &str, temp_c: f64, humidity: f64, wind_ms: f64) -> WeatherReading {
        WeatherReading {
            location: location.to_string(),
            air_temperature: temp_c,
            humidity,
            wind_speed: wind_ms,
            wind_direction: 315.0,
            visibility: 16.0,
            cloud_cover: 40.0,
            observed_at: Utc.with_ymd_and_hms(2025, 8, 1, 20, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_document_serializes_to_shared_schema() {
        let at = Utc.with_ymd_and_hms(2025, 8, 1, 20, 5, 0).unwrap();
        let doc = CacheDocument::from_readings(
            vec![
                ("Novato".to_string(), StationReading::Available(reading("Novato", 25.0, 30.0, 4.0))),
                ("Mt. Tam".to_string(), StationReading::Unavailable),
            ],
            at,
        );

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["locations"]["Mt. Tam"]["weatherData"].is_null());
        assert_eq!(json["locations"]["Novato"]["weatherData"]["airTemperature"], 25.0);
        assert!(json["locations"]["Novato"]["lastUpdated"].is_string());
        assert!(json["lastFetch"].is_string());

        let back: CacheDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_missing_weather_data_reads_as_unavailable() {
        let json = serde_json::json!({
            "locations": { "Pt. Reyes": { "lastUpdated": "2025-08-01T20:05:00Z" } },
            "lastFetch": "2025-08-01T20:05:00Z"
        });
        let doc: CacheDocument = serde_json::from_value(json).unwrap();
        assert_eq!(doc.reading("Pt. Reyes"), Some(&StationReading::Unavailable));
    }

    #[test]
    fn test_unavailable_is_distinct_from_zero_reading() {
        let zero = reading("Novato", 0.0, 0.0, 0.0);
        assert_ne!(StationReading::Available(zero), StationReading::Unavailable);
    }

    #[test]
    fn test_conditions_summary_skips_unavailable_stations() {
        let at = Utc::now();
        let doc = CacheDocument::from_readings(
            vec![
                // 30°C -> 86°F, 10 m/s -> 22 mph
                ("A".to_string(), StationReading::Available(reading("A", 30.0, 20.0, 10.0))),
                // 28°C -> 82°F, 8 m/s -> 18 mph
                ("B".to_string(), StationReading::Available(reading("B", 28.0, 20.0, 8.0))),
                ("C".to_string(), StationReading::Unavailable),
            ],
            at,
        );

        let summary = doc.conditions_summary().unwrap();
        assert_eq!(summary.stations_reporting, 2);
        assert_eq!(summary.avg_temperature_f, 84.0);
        assert_eq!(summary.avg_wind_mph, 20.0);
        assert_eq!(summary.fire_danger, FireDanger::Extreme);
        assert_eq!(doc.available_count(), 2);
        assert_eq!(doc.unavailable_count(), 1);
    }

    #[test]
    fn test_conditions_summary_none_without_readings() {
        let doc = CacheDocument::from_readings(
            vec![("A".to_string(), StationReading::Unavailable)],
            Utc::now(),
        );
        assert!(doc.conditions_summary().is_none());
    }
}
