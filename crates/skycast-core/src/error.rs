//! Centralized error types for SkyCast.
//!
//! Every error carries two faces: the `Display` text with full context for
//! logs, and `user_message()` with a short, non-technical line for the UI.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed. Please try again.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The weather service is having trouble. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
            NetworkError::InvalidResponse(_) => {
                "Received an unexpected response. Please try again."
            }
        }
    }

    /// True for failures worth retrying: timeouts, connection drops,
    /// 5xx, 408 and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Timeout | NetworkError::ConnectionFailed(_) => true,
            NetworkError::ServerError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            NetworkError::InvalidResponse(_) => false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

/// Weather and geocoding collaborator errors.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Invalid coordinates: lat {lat}, lon {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Weather API error: {0}")]
    ApiError(String),

    #[error("Failed to parse weather response: {0}")]
    Parse(String),

    #[error("Location lookup timed out")]
    LocationTimeout,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::Network(e) => e.user_message(),
            WeatherError::LocationNotFound(_) => "Location not found. Check and try again.",
            WeatherError::InvalidCoordinates { .. } => "Those coordinates are not valid.",
            WeatherError::ApiError(_) | WeatherError::Parse(_) => {
                "Weather service error. Please try again."
            }
            WeatherError::LocationTimeout => "Finding your location took too long.",
            WeatherError::ServiceUnavailable => {
                "Weather service unavailable. Please try again later."
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            WeatherError::Network(e) => e.is_transient(),
            WeatherError::LocationTimeout | WeatherError::ServiceUnavailable => true,
            _ => false,
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        WeatherError::Network(e.into_network_error())
    }
}
