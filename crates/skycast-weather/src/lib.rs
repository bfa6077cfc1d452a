//! Weather data core for SkyCast
//!
//! In-memory TTL cache, refresh throttling, busy-state coordination and
//! background refresh around an ordered collection of saved cities. Weather
//! and place names come from Open-Meteo and Nominatim through small traits.

pub mod background;
pub mod busy;
pub mod cache;
pub mod events;
pub mod geocode;
pub mod provider;
pub mod refresh;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

pub use background::{BackgroundRefresher, BackgroundSettings, TickReport};
pub use busy::{BusyCoordinator, BusyGuard, BusyMode, BusyOptions, BusySnapshot, BusyToken};
pub use cache::{CacheSettings, CacheStats, WeatherCache};
pub use events::{EventBus, StoreEvent, StoreSnapshot};
pub use geocode::NominatimLocator;
pub use provider::{
    CityLocator, NoopPreferenceSink, OpenMeteoFetcher, PreferenceSink, WeatherFetcher,
};
pub use refresh::{RefreshPolicy, RefreshSettings};
pub use retry::RetryConfig;
pub use service::{OperationError, OperationOutcome, WeatherService};
pub use store::{AddOutcome, WeatherStore, DEFAULT_MAX_CITIES};
pub use types::*;
