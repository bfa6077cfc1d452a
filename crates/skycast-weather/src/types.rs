use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use skycast_core::Unit;
use skycast_core::WeatherError;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn round_1dp(value: f64) -> f64 {
    let rounded = (value * 10.0).round() / 10.0;
    // Keep "-0.0" out of ids
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Stable city key derived from coordinates rounded to one decimal place.
///
/// Coordinates within ~0.05° of each other map to the same id.
pub fn city_id(lat: f64, lon: f64) -> String {
    format!("city:{:.1}_{:.1}", round_1dp(lat), round_1dp(lon))
}

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Result<Self, WeatherError> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        if !valid {
            return Err(WeatherError::InvalidCoordinates { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    pub fn city_id(&self) -> String {
        city_id(self.lat, self.lon)
    }
}

/// A label in the two supported UI languages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalizedLabel {
    pub en: String,
    pub he: String,
}

impl LocalizedLabel {
    pub fn new(en: impl Into<String>, he: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            he: he.into(),
        }
    }

    /// Same text in both languages.
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            en: text.clone(),
            he: text,
        }
    }

    /// Label for `lang` ("en" or "he"), falling back to English when the
    /// requested translation is empty.
    pub fn get(&self, lang: &str) -> &str {
        match lang {
            "he" if !self.he.is_empty() => &self.he,
            _ => &self.en,
        }
    }
}

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 | 66 | 67 => Self::Sleet, // freezing drizzle / rain
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear,
        }
    }

    /// Localization key for the condition label.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Clear => "condition.clear",
            Self::PartlyCloudy => "condition.partly_cloudy",
            Self::Cloudy => "condition.cloudy",
            Self::Fog => "condition.fog",
            Self::Drizzle => "condition.drizzle",
            Self::Rain => "condition.rain",
            Self::HeavyRain => "condition.heavy_rain",
            Self::Snow => "condition.snow",
            Self::Sleet => "condition.sleet",
            Self::Thunderstorm => "condition.thunderstorm",
        }
    }

    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::Clear => "sun",
            Self::PartlyCloudy => "cloud_sun",
            Self::Cloudy => "cloud",
            Self::Fog => "cloud_fog",
            Self::Drizzle | Self::Rain | Self::HeavyRain => "cloud_rain",
            Self::Snow | Self::Sleet => "cloud_snow",
            Self::Thunderstorm => "cloud_lightning",
        }
    }
}

/// Current conditions, always stored in metric units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentConditions {
    /// °C
    pub temp: f64,
    /// °C
    pub feels_like: f64,
    pub humidity: u8,
    /// km/h
    pub wind_speed: f64,
    pub condition: WeatherCondition,
    pub is_day: bool,
    /// Provider observation time, epoch ms
    pub updated_at: i64,
}

/// Everything one weather fetch returns.
///
/// `forecast` and `hourly` are passed through to the UI untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherPayload {
    pub current: CurrentConditions,
    #[serde(default)]
    pub forecast: serde_json::Value,
    #[serde(default)]
    pub hourly: serde_json::Value,
}

/// A saved city's weather snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityRecord {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub name: LocalizedLabel,
    pub country: LocalizedLabel,
    pub current: CurrentConditions,
    #[serde(default)]
    pub forecast: serde_json::Value,
    #[serde(default)]
    pub hourly: serde_json::Value,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub is_current_location: bool,
    /// Epoch ms of the last successful fetch, 0 if never fetched
    #[serde(default)]
    pub last_updated: i64,
}

impl CityRecord {
    /// Build a record from a completed fetch.
    pub fn from_fetch(
        request: &FetchRequest,
        payload: WeatherPayload,
        is_current_location: bool,
        fetched_at: i64,
    ) -> Self {
        let mut record = Self {
            id: request.id.clone(),
            lat: request.lat,
            lon: request.lon,
            name: request.name.clone().unwrap_or_default(),
            country: request.country.clone().unwrap_or_default(),
            current: CurrentConditions::default(),
            forecast: serde_json::Value::Null,
            hourly: serde_json::Value::Null,
            unit: request.unit,
            is_current_location,
            last_updated: 0,
        };
        record.apply_payload(payload, fetched_at);
        record
    }

    /// Replace the weather data and stamp `last_updated`.
    pub fn apply_payload(&mut self, payload: WeatherPayload, fetched_at: i64) {
        self.current = payload.current;
        self.forecast = payload.forecast;
        self.hourly = payload.hourly;
        self.last_updated = fetched_at;
    }

    pub fn payload(&self) -> WeatherPayload {
        WeatherPayload {
            current: self.current.clone(),
            forecast: self.forecast.clone(),
            hourly: self.hourly.clone(),
        }
    }

    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            id: self.id.clone(),
            lat: self.lat,
            lon: self.lon,
            unit: self.unit,
            name: Some(self.name.clone()),
            country: Some(self.country.clone()),
        }
    }

    /// Temperature converted to the record's display unit.
    pub fn display_temp(&self) -> f64 {
        self.unit.convert_temp(self.current.temp)
    }
}

/// Arguments for one weather fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub unit: Unit,
    pub name: Option<LocalizedLabel>,
    pub country: Option<LocalizedLabel>,
}

/// User input for adding a city.
#[derive(Debug, Clone, PartialEq)]
pub struct AddCityRequest {
    pub coordinates: Coordinates,
    pub name: LocalizedLabel,
    pub country: LocalizedLabel,
    pub is_current_location: bool,
}

impl AddCityRequest {
    pub fn new(coordinates: Coordinates, name: LocalizedLabel, country: LocalizedLabel) -> Self {
        Self {
            coordinates,
            name,
            country,
            is_current_location: false,
        }
    }

    pub fn city_id(&self) -> String {
        self.coordinates.city_id()
    }
}

/// Result of reverse geocoding in a single language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityInfo {
    pub name: String,
    pub country: String,
}

/// A newer payload waiting for the user to accept or dismiss it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBackgroundUpdate {
    pub city_id: String,
    pub city_name: LocalizedLabel,
    pub new_data: WeatherPayload,
    pub timestamp: i64,
}

/// Saved preferences written through for signed-in users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub city_ids: Vec<String>,
    pub current_city_id: Option<String>,
    pub unit: Unit,
}

/// A message key plus parameters for the localization layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusMessage {
    pub key: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl StatusMessage {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_city_id_rounds_to_one_decimal() {
        assert_eq!(city_id(40.7128, -74.0060), "city:40.7_-74.0");
        assert_eq!(city_id(31.7683, 35.2137), "city:31.8_35.2");
    }

    #[test]
    fn test_nearby_coordinates_collapse() {
        assert_eq!(city_id(32.08, 34.78), city_id(32.11, 34.81));
        assert_ne!(city_id(32.0, 34.7), city_id(32.2, 34.7));
    }

    #[test]
    fn test_city_id_has_no_negative_zero() {
        assert_eq!(city_id(-0.01, -0.04), "city:0.0_0.0");
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(90.0, -180.0).is_ok());
        assert!(Coordinates::new(90.1, 0.0).is_err());
        assert!(Coordinates::new(0.0, 180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_localized_label_fallback() {
        let label = LocalizedLabel::new("Haifa", "");
        assert_eq!(label.get("he"), "Haifa");
        let label = LocalizedLabel::new("Haifa", "חיפה");
        assert_eq!(label.get("he"), "חיפה");
        assert_eq!(label.get("fr"), "Haifa");
    }

    #[test]
    fn test_wmo_code_mapping() {
        assert_eq!(WeatherCondition::from_wmo_code(0), WeatherCondition::Clear);
        assert_eq!(WeatherCondition::from_wmo_code(2), WeatherCondition::PartlyCloudy);
        assert_eq!(WeatherCondition::from_wmo_code(48), WeatherCondition::Fog);
        assert_eq!(WeatherCondition::from_wmo_code(66), WeatherCondition::Sleet);
        assert_eq!(WeatherCondition::from_wmo_code(82), WeatherCondition::HeavyRain);
        assert_eq!(WeatherCondition::from_wmo_code(86), WeatherCondition::Snow);
        assert_eq!(WeatherCondition::from_wmo_code(99), WeatherCondition::Thunderstorm);
        assert_eq!(WeatherCondition::from_wmo_code(-1), WeatherCondition::Clear);
    }

    #[test]
    fn test_record_from_fetch_stamps_last_updated() {
        let request = FetchRequest {
            id: city_id(40.7, -74.0),
            lat: 40.7,
            lon: -74.0,
            unit: Unit::Imperial,
            name: Some(LocalizedLabel::new("New York", "ניו יורק")),
            country: None,
        };
        let payload = WeatherPayload {
            current: CurrentConditions {
                temp: 10.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let record = CityRecord::from_fetch(&request, payload, false, 1_000);
        assert_eq!(record.last_updated, 1_000);
        assert_eq!(record.current.temp, 10.0);
        assert_eq!(record.display_temp(), 50.0);
        assert_eq!(record.country, LocalizedLabel::default());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let request = FetchRequest {
            id: "city:1.0_1.0".into(),
            lat: 1.0,
            lon: 1.0,
            unit: Unit::Metric,
            name: None,
            country: None,
        };
        let record = CityRecord::from_fetch(&request, WeatherPayload::default(), true, 5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["isCurrentLocation"], true);
        assert_eq!(json["lastUpdated"], 5);
        assert_eq!(json["unit"], "metric");
    }
}
