//! Reverse geocoding: convert coordinates to a city name and country.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use skycast_core::{NetworkError, ProviderConfig, WeatherError};

use crate::provider::CityLocator;
use crate::retry::{with_retry, RetryConfig};
use crate::types::CityInfo;

const USER_AGENT: &str = "SkyCast/0.1.0";

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    state_district: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl NominatimAddress {
    /// Prefer city > town > village > municipality, then wider regions.
    fn into_city_info(self) -> Option<CityInfo> {
        let country = self.country.unwrap_or_default();
        let name = self
            .city
            .or(self.town)
            .or(self.village)
            .or(self.municipality)
            .or(self.state_district)
            .or(self.county)
            .or(self.state)
            .filter(|s| !s.is_empty())?;

        Some(CityInfo { name, country })
    }
}

#[derive(Debug, Clone)]
pub struct NominatimLocator {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl NominatimLocator {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, WeatherError> {
        Self::new(
            config.geocode_api_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            RetryConfig {
                max_retries: config.max_retries,
                ..RetryConfig::default()
            },
        )
    }

    async fn reverse_once(&self, lat: f64, lon: f64, lang: &str) -> Result<CityInfo, WeatherError> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
                ("zoom", "10".to_string()),
                ("accept-language", lang.to_string()),
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

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        body.address
            .and_then(NominatimAddress::into_city_info)
            .ok_or_else(|| WeatherError::LocationNotFound(format!("{:.4},{:.4}", lat, lon)))
    }
}

#[async_trait]
impl CityLocator for NominatimLocator {
    async fn fetch_city_by_coordinates(
        &self,
        lat: f64,
        lon: f64,
        lang: &str,
    ) -> Result<CityInfo, WeatherError> {
        let info = with_retry(&self.retry, || self.reverse_once(lat, lon, lang)).await?;
        tracing::info!("Reverse geocoded to: {}, {} ({})", info.name, info.country, lang);
        Ok(info)
    }
}
