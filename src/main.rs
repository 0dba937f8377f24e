use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use firewatch_auth::TokenManager;
use firewatch_core::{Clock, Config, SystemClock};
use firewatch_schedule::{ScheduleClient, ScheduleQuery};
use firewatch_weather::conditions::format_in_zone;
use firewatch_weather::{
    CacheSettings, FileStore, StationReading, SubscriptionHub, WeatherCache, WeatherProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    firewatch_core::init()?;

    let (config, _validation) = Config::load_validated()?;
    let http = firewatch_core::http::build_client(config.http.timeout())
        .context("Failed to build HTTP client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let zone: Tz = config.weather.display_timezone.parse().unwrap_or_else(|_| {
        tracing::warn!(
            zone = %config.weather.display_timezone,
            "unknown display timezone, using America/Los_Angeles"
        );
        chrono_tz::America::Los_Angeles
    });

    let store_dir = config.weather.effective_store_dir();
    let store = FileStore::new(&store_dir).with_poll_interval(config.weather.poll_interval());
    let provider = WeatherProvider::with_base_url(
        http.clone(),
        &config.weather.api_base_url,
        config.weather.api_key.clone(),
        clock.clone(),
    );
    let cache = WeatherCache::new(
        Arc::new(provider),
        Arc::new(store),
        clock.clone(),
        CacheSettings::from(&config.weather),
    );

    tracing::info!(store = %store_dir.display(), "Firewatch started");

    let hub = SubscriptionHub::new(cache.clone());
    let _updates = hub.subscribe(|document| {
        tracing::info!(last_fetch = %document.last_fetch, "weather snapshot updated");
    })?;

    println!("Firewatch - District Conditions");

    match cache.get().await {
        Ok(document) => {
            println!(
                "\nWeather (fetched {}, {})",
                format_in_zone(document.last_fetch, zone),
                cache.formatted_last_update().await?
            );

            for (station, reading) in cache.station_readings(&document) {
                match reading {
                    StationReading::Available(r) => println!(
                        "  {:<12} {:>4}°F  {:>3}% RH  {:>3} mph {:<3}  {:>3} mi  {}",
                        station.name,
                        r.temperature_f(),
                        r.humidity.round(),
                        r.wind_mph(),
                        r.wind_cardinal(),
                        r.visibility_miles(),
                        r.sky()
                    ),
                    StationReading::Unavailable => {
                        println!("  {:<12} unavailable", station.name)
                    }
                }
            }

            match document.conditions_summary() {
                Some(summary) => println!(
                    "\nFire danger: {} (avg {:.0}°F, {:.0}% RH, {:.0} mph over {} stations)",
                    summary.fire_danger,
                    summary.avg_temperature_f,
                    summary.avg_humidity,
                    summary.avg_wind_mph,
                    summary.stations_reporting
                ),
                None => println!("\nFire danger: no stations reporting"),
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "weather snapshot unavailable");
            println!("\nWeather: {}", e.user_message());
        }
    }

    if config.schedule.is_configured() {
        let tokens = TokenManager::from_config(http.clone(), &config.schedule, clock.clone())?;
        let schedule = ScheduleClient::from_config(http, &config.schedule, tokens);
        let today = Utc::now().with_timezone(&zone).date_naive();

        // Date filters are rejected by some deployments, so fetch the full roster
        match schedule.get_schedule(ScheduleQuery::default()).await {
            Ok(roster) => {
                println!("\nStaffing for {}", today.format("%A, %B %-d"));
                let assignments = roster.assignments_for(today);
                if assignments.is_empty() {
                    println!("  No assignments scheduled");
                }
                for assignment in assignments {
                    println!(
                        "  {:<36} {}/{}  {}",
                        assignment.display_name(),
                        assignment.shifts.len(),
                        assignment.minimum_staffing,
                        assignment.staffing_status()
                    );
                    for shift in &assignment.shifts {
                        println!(
                            "      {:<24} {}",
                            shift.person_name(),
                            shift.time_range().unwrap_or_default()
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load schedule");
                println!("\nStaffing: {}", e.user_message());
            }
        }
    } else {
        tracing::info!("scheduling credentials not configured, skipping roster");
    }

    println!("\nConfig directory: {}", config.config_dir.display());
    tracing::info!(subscribers = hub.subscriber_count(), "Firewatch shutting down");

    Ok(())
}
