use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{AppError, ConfigError};

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

    /// All errors joined into one line, empty when valid
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Display unit for temperatures and speeds.
///
/// Stored data is always metric; the unit only affects rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Metric,
    Imperial,
}

impl Unit {
    /// Convert a Celsius temperature for display.
    pub fn convert_temp(self, celsius: f64) -> f64 {
        match self {
            Unit::Metric => celsius,
            Unit::Imperial => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    /// Convert a km/h speed for display.
    pub fn convert_speed(self, kmh: f64) -> f64 {
        match self {
            Unit::Metric => kmh,
            Unit::Imperial => kmh * 0.621_371,
        }
    }

    pub fn temperature_symbol(self) -> &'static str {
        match self {
            Unit::Metric => "C",
            Unit::Imperial => "F",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Metric => "metric",
            Unit::Imperial => "imperial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub provider: ProviderConfig,
}

/// TTL cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries younger than this are served from cache
    #[serde(default = "default_fresh_window_minutes")]
    pub fresh_window_minutes: u64,
    /// Hard cap on cached cities
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Minimum gap between two cleanup passes
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
    /// Tighter age limit applied once the cache is under pressure
    #[serde(default = "default_pressure_window_minutes")]
    pub pressure_window_minutes: u64,
    /// Occupancy ratio (of `max_entries`) that counts as pressure
    #[serde(default = "default_pressure_ratio")]
    pub pressure_ratio: f64,
}

fn default_fresh_window_minutes() -> u64 {
    180
}

fn default_max_entries() -> usize {
    150
}

fn default_cleanup_interval_minutes() -> u64 {
    10
}

fn default_pressure_window_minutes() -> u64 {
    60
}

fn default_pressure_ratio() -> f64 {
    0.8
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_window_minutes: default_fresh_window_minutes(),
            max_entries: default_max_entries(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            pressure_window_minutes: default_pressure_window_minutes(),
            pressure_ratio: default_pressure_ratio(),
        }
    }
}

/// Staleness, throttling and background refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Records older than this are stale
    #[serde(default = "default_fresh_window_minutes")]
    pub stale_after_minutes: u64,
    /// Minimum gap between refresh attempts for one city
    #[serde(default = "default_throttle_seconds")]
    pub throttle_seconds: u64,
    /// Background scan period (0 disables the background refresher)
    #[serde(default = "default_background_interval_minutes")]
    pub background_interval_minutes: u64,
    /// Age after which a city is picked up by the background scan
    #[serde(default = "default_background_threshold_minutes")]
    pub background_threshold_minutes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Upper bound on reverse geocoding a location fix
    #[serde(default = "default_geolocation_timeout_secs")]
    pub geolocation_timeout_secs: u64,
}

fn default_throttle_seconds() -> u64 {
    60
}

fn default_background_interval_minutes() -> u64 {
    5
}

fn default_background_threshold_minutes() -> u64 {
    20
}

fn default_batch_size() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_geolocation_timeout_secs() -> u64 {
    10
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_fresh_window_minutes(),
            throttle_seconds: default_throttle_seconds(),
            background_interval_minutes: default_background_interval_minutes(),
            background_threshold_minutes: default_background_threshold_minutes(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            geolocation_timeout_secs: default_geolocation_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_cities")]
    pub max_cities: usize,
    #[serde(default)]
    pub unit: Unit,
}

fn default_max_cities() -> usize {
    15
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_cities: default_max_cities(),
            unit: Unit::default(),
        }
    }
}

/// Upstream weather and geocoding endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_weather_api_url")]
    pub weather_api_url: String,
    #[serde(default = "default_geocode_api_url")]
    pub geocode_api_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_weather_api_url() -> String {
    "https://api.open-meteo.com".to_string()
}

fn default_geocode_api_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            weather_api_url: default_weather_api_url(),
            geocode_api_url: default_geocode_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skycast");

        Self {
            config_dir,
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            store: StoreConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, writing defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok(config)
    }

    /// Load configuration from the default location and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated() -> Result<(Self, ValidationResult), AppError> {
        Self::load_validated_from(&Self::config_path()?)
    }

    pub fn load_validated_from(path: &Path) -> Result<(Self, ValidationResult), AppError> {
        let config = Self::load_from(path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(
            &self.provider.weather_api_url,
            "provider.weather_api_url",
            &mut result,
        );
        self.validate_url(
            &self.provider.geocode_api_url,
            "provider.geocode_api_url",
            &mut result,
        );

        if self.provider.request_timeout_secs == 0 {
            result.add_error(
                "provider.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if self.store.max_cities == 0 {
            result.add_error("store.max_cities", "At least one city must be allowed");
        }

        if self.cache.max_entries == 0 {
            result.add_error("cache.max_entries", "Cache must hold at least one entry");
        } else if self.cache.max_entries < self.store.max_cities {
            result.add_warning(
                "cache.max_entries",
                "Cache is smaller than the city limit; saved cities will be evicted",
            );
        }

        if self.cache.fresh_window_minutes == 0 {
            result.add_error(
                "cache.fresh_window_minutes",
                "Freshness window must be greater than 0",
            );
        }

        if !(self.cache.pressure_ratio > 0.0 && self.cache.pressure_ratio <= 1.0) {
            result.add_error(
                "cache.pressure_ratio",
                format!(
                    "Pressure ratio must be in (0, 1], got {}",
                    self.cache.pressure_ratio
                ),
            );
        }

        if self.refresh.batch_size == 0 {
            result.add_error("refresh.batch_size", "Batch size must be greater than 0");
        }

        if self.refresh.background_interval_minutes == 0 {
            result.add_warning(
                "refresh.background_interval_minutes",
                "Background refresh disabled (0 minutes)",
            );
        }

        if self.refresh.throttle_seconds == 0 {
            result.add_warning(
                "refresh.throttle_seconds",
                "Refresh throttle disabled; repeated failures will hit the provider",
            );
        }

        if self.refresh.background_threshold_minutes > self.refresh.stale_after_minutes {
            result.add_warning(
                "refresh.background_threshold_minutes",
                "Background threshold exceeds the staleness window",
            );
        }

        result
    }

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

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), AppError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, contents)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("no platform config directory".into()))?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}
