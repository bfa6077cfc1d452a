//! Collaborator seams and the Open-Meteo weather fetcher.
//!
//! The core only needs three capabilities: fetch weather for coordinates,
//! reverse geocode a location fix, and persist preferences. Each is a trait
//! so tests and alternative backends can stand in.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use skycast_core::{NetworkError, ProviderConfig, WeatherError};

use crate::retry::{with_retry, RetryConfig};
use crate::types::{
    CityInfo, CurrentConditions, FetchRequest, Preferences, WeatherCondition, WeatherPayload,
};

#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch_weather(&self, request: &FetchRequest) -> Result<WeatherPayload, WeatherError>;
}

#[async_trait]
pub trait CityLocator: Send + Sync {
    /// Name and country for a location fix, in `lang` ("en" or "he").
    async fn fetch_city_by_coordinates(
        &self,
        lat: f64,
        lon: f64,
        lang: &str,
    ) -> Result<CityInfo, WeatherError>;
}

/// Best-effort write-through of saved cities for signed-in users.
#[async_trait]
pub trait PreferenceSink: Send + Sync {
    async fn persist_preferences(&self, preferences: &Preferences) -> Result<(), WeatherError>;
}

/// Sink for anonymous sessions; nothing is stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreferenceSink;

#[async_trait]
impl PreferenceSink for NoopPreferenceSink {
    async fn persist_preferences(&self, _preferences: &Preferences) -> Result<(), WeatherError> {
        Ok(())
    }
}

const CURRENT_FIELDS: &str = "temperature_2m,apparent_temperature,relative_humidity_2m,wind_speed_10m,weather_code,is_day";
const HOURLY_FIELDS: &str = "temperature_2m,weather_code,precipitation_probability";
const DAILY_FIELDS: &str =
    "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max,sunrise,sunset";
const FORECAST_DAYS: &str = "7";

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: OpenMeteoCurrent,
    #[serde(default)]
    hourly: serde_json::Value,
    #[serde(default)]
    daily: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    /// Unix seconds (requested with `timeformat=unixtime`)
    time: i64,
    temperature_2m: f64,
    apparent_temperature: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: i32,
    #[serde(default)]
    is_day: u8,
}

impl From<OpenMeteoResponse> for WeatherPayload {
    fn from(body: OpenMeteoResponse) -> Self {
        let current = body.current;
        WeatherPayload {
            current: CurrentConditions {
                temp: current.temperature_2m,
                feels_like: current.apparent_temperature,
                humidity: current.relative_humidity_2m.clamp(0.0, 100.0).round() as u8,
                wind_speed: current.wind_speed_10m,
                condition: WeatherCondition::from_wmo_code(current.weather_code),
                is_day: current.is_day != 0,
                updated_at: current.time * 1000,
            },
            forecast: body.daily,
            hourly: body.hourly,
        }
    }
}

/// Weather fetcher backed by the Open-Meteo forecast API.
///
/// Always requests metric units; display conversion happens downstream.
#[derive(Debug, Clone)]
pub struct OpenMeteoFetcher {
    client: Arc<Client>,
    base_url: String,
    retry: RetryConfig,
}

impl OpenMeteoFetcher {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, WeatherError> {
        Self::new(
            config.weather_api_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            RetryConfig {
                max_retries: config.max_retries,
                ..RetryConfig::default()
            },
        )
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<WeatherPayload, WeatherError> {
        let url = format!("{}/v1/forecast", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", request.lat.to_string()),
                ("longitude", request.lon.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("forecast_days", FORECAST_DAYS.to_string()),
                ("timezone", "auto".to_string()),
                ("timeformat", "unixtime".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        Ok(body.into())
    }
}

#[async_trait]
impl WeatherFetcher for OpenMeteoFetcher {
    async fn fetch_weather(&self, request: &FetchRequest) -> Result<WeatherPayload, WeatherError> {
        tracing::debug!(city_id = %request.id, lat = request.lat, lon = request.lon, "fetch_weather");
        with_retry(&self.retry, || self.fetch_once(request)).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_response_maps_to_payload() {
        let body: OpenMeteoResponse = serde_json::from_value(serde_json::json!({
            "current": {
                "time": 1_700_000_000,
                "temperature_2m": 18.4,
                "apparent_temperature": 17.9,
                "relative_humidity_2m": 64,
                "wind_speed_10m": 12.5,
                "weather_code": 61,
                "is_day": 1
            },
            "daily": { "time": [1_700_000_000] }
        }))
        .unwrap();

        let payload = WeatherPayload::from(body);
        assert_eq!(payload.current.temp, 18.4);
        assert_eq!(payload.current.humidity, 64);
        assert_eq!(payload.current.condition, WeatherCondition::Rain);
        assert!(payload.current.is_day);
        assert_eq!(payload.current.updated_at, 1_700_000_000_000);
        assert!(payload.hourly.is_null());
        assert!(payload.forecast.is_object());
    }

    #[tokio::test]
    async fn test_noop_sink_accepts_everything() {
        let prefs = Preferences {
            city_ids: vec!["city:1.0_1.0".into()],
            current_city_id: None,
            unit: crate::types::Unit::Metric,
        };
        assert!(NoopPreferenceSink.persist_preferences(&prefs).await.is_ok());
    }
}
