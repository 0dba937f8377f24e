use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Weather provider and cache settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Crew scheduling API settings
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to every outbound request, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// A weather station the cache refills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl StationConfig {
    fn new(name: &str, lat: f64, lng: f64) -> Self {
        Self {
            name: name.to_string(),
            lat,
            lng,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Base URL of the point-weather API
    #[serde(default = "default_weather_api_url")]
    pub api_base_url: String,

    /// API key sent in the Authorization header.
    /// Overridden by FIREWATCH_STORMGLASS_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maximum age of the cached snapshot before it is refilled
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,

    /// Directory backing the shared document store.
    /// Defaults to `<cache dir>/firewatch/store`.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// How often the file-backed change feed checks for writes
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// IANA zone used for displayed timestamps
    #[serde(default = "default_display_timezone")]
    pub display_timezone: String,

    #[serde(default = "default_stations")]
    pub stations: Vec<StationConfig>,
}

fn default_weather_api_url() -> String {
    "https://api.stormglass.io/v2".to_string()
}

/// One week.
const MAX_CACHE_TTL_MINUTES: u64 = 7 * 24 * 60;

/// One day.
const MAX_SAFETY_MARGIN_SECS: u64 = 24 * 60 * 60;

fn default_cache_ttl_minutes() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_display_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_stations() -> Vec<StationConfig> {
    vec![
        StationConfig::new("San Rafael", 37.9735, -122.5311),
        StationConfig::new("Novato", 38.1074, -122.5697),
        StationConfig::new("Pt. Reyes", 38.0689, -122.8997),
        StationConfig::new("Mt. Tam", 37.9235, -122.5965),
    ]
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_weather_api_url(),
            api_key: None,
            cache_ttl_minutes: default_cache_ttl_minutes(),
            store_dir: None,
            poll_interval_secs: default_poll_interval_secs(),
            display_timezone: default_display_timezone(),
            stations: default_stations(),
        }
    }
}

impl WeatherConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_ttl_minutes.min(MAX_CACHE_TTL_MINUTES) as i64)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    /// The configured store directory, or the platform cache directory.
    pub fn effective_store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("firewatch")
                .join("store")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Base URL of the crew scheduling API
    #[serde(default = "default_schedule_url")]
    pub base_url: String,

    /// Overridden by FIREWATCH_CREWSENSE_CLIENT_ID.
    #[serde(default)]
    pub client_id: String,

    /// Overridden by FIREWATCH_CREWSENSE_CLIENT_SECRET.
    #[serde(default)]
    pub client_secret: String,

    /// Tokens are refreshed this long before they expire
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
}

fn default_schedule_url() -> String {
    "https://api.crewsense.com".to_string()
}

fn default_safety_margin_secs() -> u64 {
    300
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            base_url: default_schedule_url(),
            client_id: String::new(),
            client_secret: String::new(),
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

impl ScheduleConfig {
    /// Check if credentials are configured
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_margin_secs.min(MAX_SAFETY_MARGIN_SECS) as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("firewatch");

        Self {
            config_dir,
            http: HttpConfig::default(),
            weather: WeatherConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the platform config directory, creating a
    /// default file if it doesn't exist. Environment overrides are applied.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an explicit path, writing defaults if missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Secrets may come from the environment instead of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("FIREWATCH_STORMGLASS_API_KEY") {
            self.weather.api_key = Some(key);
        }
        if let Ok(id) = std::env::var("FIREWATCH_CREWSENSE_CLIENT_ID") {
            self.schedule.client_id = id;
        }
        if let Ok(secret) = std::env::var("FIREWATCH_CREWSENSE_CLIENT_SECRET") {
            self.schedule.client_secret = secret;
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.weather.api_base_url, "weather.api_base_url", &mut result);
        self.validate_url(&self.schedule.base_url, "schedule.base_url", &mut result);

        if self.http.timeout_secs == 0 {
            result.add_error("http.timeout_secs", "Timeout must be greater than 0");
        } else if self.http.timeout_secs > 120 {
            result.add_warning("http.timeout_secs", "Timeout is unusually long (>120s)");
        }

        if self.weather.cache_ttl_minutes == 0 {
            result.add_warning(
                "weather.cache_ttl_minutes",
                "Cache TTL is 0; every read will refill from the weather API",
            );
        } else if self.weather.cache_ttl_minutes > MAX_CACHE_TTL_MINUTES {
            result.add_error(
                "weather.cache_ttl_minutes",
                format!("Cache TTL must be at most {} minutes", MAX_CACHE_TTL_MINUTES),
            );
        }

        if self.weather.poll_interval_secs == 0 {
            result.add_error(
                "weather.poll_interval_secs",
                "Poll interval must be greater than 0",
            );
        }

        if self.weather.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            result.add_warning(
                "weather.api_key",
                "Weather API key not configured - all stations will report unavailable",
            );
        }

        if self.weather.stations.is_empty() {
            result.add_error("weather.stations", "At least one station is required");
        }
        for (i, station) in self.weather.stations.iter().enumerate() {
            let field = format!("weather.stations[{}]", i);
            if station.name.trim().is_empty() {
                result.add_error(&field, "Station name must not be empty");
            }
            if !(-90.0..=90.0).contains(&station.lat) || !(-180.0..=180.0).contains(&station.lng) {
                result.add_error(
                    &field,
                    format!("Coordinates out of range: {}, {}", station.lat, station.lng),
                );
            }
        }
        let mut names: Vec<&str> = self.weather.stations.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            result.add_error("weather.stations", "Station names must be unique");
        }

        if self.schedule.safety_margin_secs > MAX_SAFETY_MARGIN_SECS {
            result.add_error(
                "schedule.safety_margin_secs",
                format!("Safety margin must be at most {} seconds", MAX_SAFETY_MARGIN_SECS),
            );
        }

        if !self.schedule.is_configured() {
            result.add_warning(
                "schedule",
                "Scheduling credentials not configured - staffing data will be unavailable",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("firewatch");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        // Missing secrets are warnings, not errors
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.field == "schedule"));
        assert!(result.warnings.iter().any(|w| w.field == "weather.api_key"));
    }

    #[test]
    fn test_defaults_match_reference_windows() {
        let config = Config::default();
        assert_eq!(config.weather.cache_ttl(), chrono::Duration::hours(1));
        assert_eq!(config.schedule.safety_margin(), chrono::Duration::minutes(5));
        assert_eq!(config.http.timeout(), std::time::Duration::from_secs(10));
        assert_eq!(config.weather.stations.len(), 4);
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.schedule.base_url = "ftp://api.example.com".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.weather.api_base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "weather.api_base_url"));
    }

    #[test]
    fn test_duplicate_and_out_of_range_stations() {
        let mut config = Config::default();
        config.weather.stations.push(StationConfig::new("Novato", 38.1, -122.5));
        config.weather.stations.push(StationConfig::new("Nowhere", 123.0, 0.0));
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("unique")));
        assert!(result.errors.iter().any(|e| e.field == "weather.stations[5]"));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = Config::default();
        config.http.timeout_secs = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "http.timeout_secs"));
    }

    #[test]
    fn test_huge_windows_are_rejected_and_clamped() {
        let mut config = Config::default();
        config.weather.cache_ttl_minutes = u64::MAX;
        config.schedule.safety_margin_secs = u64::MAX;

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "weather.cache_ttl_minutes"));
        assert!(result.errors.iter().any(|e| e.field == "schedule.safety_margin_secs"));

        assert_eq!(config.weather.cache_ttl(), chrono::Duration::days(7));
        assert_eq!(config.schedule.safety_margin(), chrono::Duration::days(1));
    }

    #[test]
    fn test_load_from_writes_defaults_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.weather.stations, created.weather.stations);
        assert_eq!(loaded.schedule.base_url, "https://api.crewsense.com");
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
config_dir = "/tmp/firewatch"

[weather]
cache_ttl_minutes = 15

[schedule]
client_id = "abc"
client_secret = "xyz"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.weather.cache_ttl(), chrono::Duration::minutes(15));
        assert_eq!(config.weather.stations.len(), 4);
        assert!(config.schedule.is_configured());
        assert_eq!(config.schedule.safety_margin_secs, 300);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
