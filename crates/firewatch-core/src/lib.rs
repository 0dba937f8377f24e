//! Shared plumbing for the Firewatch crates: configuration, the error
//! taxonomy, an injectable clock, and the single-flight primitive used by
//! the weather cache and the token manager.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod single_flight;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, HttpConfig, ScheduleConfig, StationConfig, ValidationResult, WeatherConfig};
pub use error::{
    ApiError, AuthError, CacheReadError, NetworkError, ProviderFetchError, ReqwestErrorExt,
    StoreError,
};
pub use single_flight::SingleFlight;

use anyhow::Result;

/// Initialize logging for a Firewatch process.
///
/// Honors `RUST_LOG`; defaults to `info`.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::info!("Firewatch core initialized");
    Ok(())
}
