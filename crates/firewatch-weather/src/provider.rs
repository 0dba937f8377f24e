use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use firewatch_core::{Clock, NetworkError, ProviderFetchError, ReqwestErrorExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::types::{Station, StationReading, WeatherReading};

const STORMGLASS_API_BASE: &str = "https://api.stormglass.io/v2";
const POINT_PARAMS: &str = "airTemperature,humidity,windSpeed,windDirection,visibility,cloudCover";

/// Produces one station's current reading.
///
/// Implementations absorb their own failures: a station that cannot be read
/// is `Unavailable`, it never fails the caller.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_reading(&self, station: &Station) -> StationReading;
}

/// Point-weather API client.
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    clock: Arc<dyn Clock>,
}

impl WeatherProvider {
    pub fn new(client: Client, api_key: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self::with_base_url(client, STORMGLASS_API_BASE, api_key, clock)
    }

    pub fn with_base_url(
        client: Client,
        base_url: &str,
        api_key: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            clock,
        }
    }

    /// Fetch the reading for `station`, reporting why it failed.
    #[instrument(skip(self, station), fields(station = %station.name), level = "debug")]
    pub async fn try_fetch(&self, station: &Station) -> Result<WeatherReading, ProviderFetchError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderFetchError::MissingApiKey)?;

        let now = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = format!("{}/weather/point", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", api_key)
            .query(&[
                ("lat", station.lat.to_string()),
                ("lng", station.lng.to_string()),
                ("params", POINT_PARAMS.to_string()),
                ("start", now.clone()),
                ("end", now),
            ])
            .send()
            .await
            .map_err(|e| ProviderFetchError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderFetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderFetchError::Network(e.into_network_error()))?;
        let point: PointResponse =
            serde_json::from_str(&body).map_err(|e| ProviderFetchError::Parse(e.to_string()))?;

        let hour = point.hours.into_iter().next().ok_or(ProviderFetchError::NoData)?;
        Ok(hour.into_reading(&station.name, self.clock.now()))
    }
}

#[async_trait]
impl WeatherSource for WeatherProvider {
    async fn fetch_reading(&self, station: &Station) -> StationReading {
        match self.try_fetch(station).await {
            Ok(reading) => StationReading::Available(reading),
            Err(ProviderFetchError::Network(NetworkError::Timeout)) => {
                tracing::warn!(station = %station.name, "weather fetch timed out");
                StationReading::Unavailable
            }
            Err(e) => {
                tracing::warn!(station = %station.name, error = %e, "weather fetch failed");
                StationReading::Unavailable
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PointResponse {
    #[serde(default)]
    hours: Vec<HourEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HourEntry {
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    air_temperature: SourceValue,
    humidity: SourceValue,
    wind_speed: SourceValue,
    wind_direction: SourceValue,
    visibility: SourceValue,
    cloud_cover: SourceValue,
}

/// Values are keyed by data source; we read the NOAA one.
#[derive(Debug, Deserialize)]
struct SourceValue {
    noaa: f64,
}

impl HourEntry {
    fn into_reading(self, location: &str, fetched_at: DateTime<Utc>) -> WeatherReading {
        WeatherReading {
            location: location.to_string(),
            air_temperature: self.air_temperature.noaa,
            humidity: self.humidity.noaa,
            wind_speed: self.wind_speed.noaa,
            wind_direction: self.wind_direction.noaa,
            visibility: self.visibility.noaa,
            cloud_cover: self.cloud_cover.noaa,
            observed_at: self.time.unwrap_or(fetched_at),
        }
    }
}
