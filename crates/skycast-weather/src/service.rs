//! User-facing weather actions.
//!
//! `WeatherService` owns the store, cache, refresh policy, busy coordinator
//! and background refresher, and turns every collaborator failure into an
//! `OperationOutcome` at the action boundary.

use futures::future::try_join;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use skycast_core::{Config, WeatherError};

use crate::background::{BackgroundRefresher, BackgroundSettings};
use crate::busy::{BusyCoordinator, BusyGuard, BusyOptions, BusySnapshot, BusyToken};
use crate::cache::{CacheSettings, WeatherCache};
use crate::events::{EventBus, StoreEvent, StoreSnapshot};
use crate::provider::{CityLocator, PreferenceSink, WeatherFetcher};
use crate::refresh::{RefreshPolicy, RefreshSettings};
use crate::store::{AddOutcome, WeatherStore};
use crate::types::{
    now_ms, AddCityRequest, CityRecord, Coordinates, FetchRequest, LocalizedLabel, Preferences,
    StatusMessage, Unit,
};

const ADD_SCOPE: &str = "add";
const REFRESH_SCOPE: &str = "refresh";
const LOCATE_SCOPE: &str = "locate";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("operation already in progress")]
    OperationInProgress,

    #[error("city not found")]
    NotFound,

    #[error("weather fetch failed: {0}")]
    Fetch(String),

    #[error("location lookup failed: {0}")]
    Location(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Added { index: usize },
    Refreshed,
    /// Data is still fresh; nothing was fetched
    Fresh,
    /// Stale, but attempted too recently
    Throttled,
    Exists,
    MaxCities,
    Error(OperationError),
}

impl OperationOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Busy guard that announces the new busy state once it is released.
struct OperationGuard<'a> {
    busy: &'a BusyCoordinator,
    events: &'a EventBus,
    guard: Option<BusyGuard<'a>>,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            self.events.emit(StoreEvent::Busy(self.busy.snapshot()));
        }
    }
}

pub struct WeatherService {
    store: Arc<RwLock<WeatherStore>>,
    cache: Arc<WeatherCache>,
    policy: Arc<RefreshPolicy>,
    busy: BusyCoordinator,
    refresher: Arc<BackgroundRefresher>,
    fetcher: Arc<dyn WeatherFetcher>,
    locator: Arc<dyn CityLocator>,
    preferences: Option<Arc<dyn PreferenceSink>>,
    events: EventBus,
    unit: Mutex<Unit>,
    geolocation_timeout: Duration,
}

impl std::fmt::Debug for WeatherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherService")
            .field("cities", &self.store.read().len())
            .field("busy", &self.busy.snapshot())
            .field("unit", &*self.unit.lock())
            .finish_non_exhaustive()
    }
}

impl WeatherService {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn WeatherFetcher>,
        locator: Arc<dyn CityLocator>,
    ) -> Self {
        let store = Arc::new(RwLock::new(WeatherStore::new(config.store.max_cities)));
        let cache = Arc::new(WeatherCache::new(CacheSettings::from(&config.cache)));
        let policy = Arc::new(RefreshPolicy::new(RefreshSettings::from(&config.refresh)));
        let events = EventBus::new();
        let refresher = Arc::new(BackgroundRefresher::new(
            BackgroundSettings::from(&config.refresh),
            store.clone(),
            cache.clone(),
            policy.clone(),
            fetcher.clone(),
            events.clone(),
        ));

        Self {
            store,
            cache,
            policy,
            busy: BusyCoordinator::new(),
            refresher,
            fetcher,
            locator,
            preferences: None,
            events,
            unit: Mutex::new(config.store.unit),
            geolocation_timeout: Duration::from_secs(config.refresh.geolocation_timeout_secs),
        }
    }

    /// Write saved cities through to `sink` after every change to them.
    pub fn with_preference_sink(mut self, sink: Arc<dyn PreferenceSink>) -> Self {
        self.preferences = Some(sink);
        self
    }

    pub fn refresher(&self) -> Arc<BackgroundRefresher> {
        self.refresher.clone()
    }

    pub fn cache(&self) -> &WeatherCache {
        &self.cache
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn busy(&self) -> &BusyCoordinator {
        &self.busy
    }

    pub fn unit(&self) -> Unit {
        *self.unit.lock()
    }

    // ---- Reads ----

    pub fn snapshot(&self) -> StoreSnapshot {
        let store = self.store.read();
        StoreSnapshot {
            cities: store.cities().to_vec(),
            current_index: store.current_index(),
            pending_updates: store.pending_updates().to_vec(),
            busy: self.busy.snapshot(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn cities(&self) -> Vec<CityRecord> {
        self.store.read().cities().to_vec()
    }

    pub fn city(&self, id: &str) -> Option<CityRecord> {
        self.store.read().get(id).cloned()
    }

    pub fn current_city(&self) -> Option<CityRecord> {
        self.store.read().current().cloned()
    }

    pub fn preferences(&self) -> Preferences {
        let store = self.store.read();
        Preferences {
            city_ids: store.city_ids(),
            current_city_id: store.current().map(|c| c.id.clone()),
            unit: self.unit(),
        }
    }

    // ---- Actions ----

    /// Fetch weather for a new city and append it to the collection.
    pub async fn add_city(&self, request: AddCityRequest) -> OperationOutcome {
        let id = request.city_id();
        let status = StatusMessage::new("status.adding_city").with_param("name", &request.name.en);
        let Some(_guard) = self.begin_exclusive(
            ADD_SCOPE,
            Some(&id),
            BusyOptions::non_blocking().with_status(status),
        ) else {
            tracing::debug!(city_id = %id, "add_city already in progress");
            return OperationOutcome::Error(OperationError::OperationInProgress);
        };

        {
            let store = self.store.read();
            if store.contains(&id) {
                return OperationOutcome::Exists;
            }
            if store.is_full() {
                return OperationOutcome::MaxCities;
            }
        }

        let record = match self.cache.get(&id) {
            Some(mut cached) => {
                tracing::debug!(city_id = %id, "add_city served from cache");
                cached.name = request.name.clone();
                cached.country = request.country.clone();
                cached.unit = self.unit();
                cached.is_current_location = request.is_current_location;
                cached
            }
            None => {
                let fetch = FetchRequest {
                    id: id.clone(),
                    lat: request.coordinates.lat,
                    lon: request.coordinates.lon,
                    unit: self.unit(),
                    name: Some(request.name.clone()),
                    country: Some(request.country.clone()),
                };
                match self.fetcher.fetch_weather(&fetch).await {
                    Ok(payload) => {
                        let now = now_ms();
                        let record = CityRecord::from_fetch(
                            &fetch,
                            payload,
                            request.is_current_location,
                            now,
                        );
                        self.cache.set_at(record.clone(), now);
                        self.policy.mark_refreshed_at(&id, now);
                        record
                    }
                    Err(e) => {
                        return self.manual_failure(
                            "error.add_city_failed",
                            &request.name,
                            &id,
                            e,
                        );
                    }
                }
            }
        };

        let outcome = self.store.write().add_city(record.clone());
        match outcome {
            AddOutcome::Added { index } => {
                self.refresher.observe(&record);
                tracing::info!(city_id = %id, index, "City added");
                self.events.emit(StoreEvent::Changed);
                self.persist_preferences().await;
                OperationOutcome::Added { index }
            }
            AddOutcome::Exists => OperationOutcome::Exists,
            AddOutcome::MaxCities => OperationOutcome::MaxCities,
        }
    }

    /// Name a location fix in both languages and add it as the current location.
    ///
    /// A fix inside an already saved city flags that city instead.
    pub async fn add_current_location(&self, lat: f64, lon: f64) -> OperationOutcome {
        let coordinates = match Coordinates::new(lat, lon) {
            Ok(coordinates) => coordinates,
            Err(e) => return OperationOutcome::Error(OperationError::Location(e.to_string())),
        };

        let id = coordinates.city_id();
        let known = self.store.read().contains(&id);
        if known {
            if self.store.write().mark_current_location(&id) {
                self.events.emit(StoreEvent::Changed);
            }
            return OperationOutcome::Exists;
        }

        let lookup = {
            let Some(_guard) = self.begin_exclusive(
                LOCATE_SCOPE,
                None,
                BusyOptions::blocking().with_status(StatusMessage::new("status.locating")),
            ) else {
                return OperationOutcome::Error(OperationError::OperationInProgress);
            };

            let both = try_join(
                self.locator.fetch_city_by_coordinates(lat, lon, "en"),
                self.locator.fetch_city_by_coordinates(lat, lon, "he"),
            );
            match tokio::time::timeout(self.geolocation_timeout, both).await {
                Ok(result) => result,
                Err(_) => Err(WeatherError::LocationTimeout),
            }
        };

        let (en, he) = match lookup {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Reverse geocoding failed");
                self.events.emit(StoreEvent::Notification(StatusMessage::new(
                    "error.location_failed",
                )));
                return OperationOutcome::Error(OperationError::Location(e.to_string()));
            }
        };

        let request = AddCityRequest {
            coordinates,
            name: LocalizedLabel::new(en.name, he.name),
            country: LocalizedLabel::new(en.country, he.country),
            is_current_location: true,
        };
        self.add_city(request).await
    }

    /// Refresh one city. Without `force`, fresh or throttled cities are left alone.
    pub async fn refresh_city(&self, id: &str, force: bool) -> OperationOutcome {
        let Some(record) = self.city(id) else {
            return OperationOutcome::Error(OperationError::NotFound);
        };

        if !force {
            if let Some(cached) = self.cache.get(id) {
                if cached.last_updated > record.last_updated {
                    self.store
                        .write()
                        .update_city(id, |city| city.apply_payload(cached.payload(), cached.last_updated));
                    self.refresher.observe(&cached);
                    self.events.emit(StoreEvent::Changed);
                }
                return OperationOutcome::Fresh;
            }
            if !self.policy.is_stale(&record) {
                return OperationOutcome::Fresh;
            }
        }

        let status = StatusMessage::new("status.refreshing").with_param("name", &record.name.en);
        let Some(_guard) = self.begin_exclusive(
            REFRESH_SCOPE,
            Some(id),
            BusyOptions::non_blocking().with_status(status),
        ) else {
            return OperationOutcome::Error(OperationError::OperationInProgress);
        };

        // Stamped only by the call that owns the busy key
        if !force && !self.policy.can_attempt(id) {
            return OperationOutcome::Throttled;
        }

        let payload = match self.fetcher.fetch_weather(&record.fetch_request()).await {
            Ok(payload) => payload,
            Err(e) => return self.manual_failure("error.refresh_failed", &record.name, id, e),
        };

        let now = now_ms();
        let updated = {
            let mut store = self.store.write();
            store.update_city(id, |city| city.apply_payload(payload, now));
            // Fresh data supersedes anything staged in the background
            store.take_pending(id);
            store.get(id).cloned()
        };
        let Some(updated) = updated else {
            return OperationOutcome::Error(OperationError::NotFound);
        };

        self.cache.set_at(updated.clone(), now);
        self.policy.mark_refreshed_at(id, now);
        self.refresher.observe(&updated);
        self.events.emit(StoreEvent::Changed);
        tracing::info!(city_id = %id, force, "City refreshed");
        OperationOutcome::Refreshed
    }

    /// Refresh every saved city in order.
    pub async fn refresh_all(&self, force: bool) -> Vec<(String, OperationOutcome)> {
        let ids = self.store.read().city_ids();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.refresh_city(&id, force).await;
            outcomes.push((id, outcome));
        }
        outcomes
    }

    pub async fn remove_city(&self, id: &str) -> bool {
        if self.store.write().remove_city(id).is_none() {
            return false;
        }
        self.cache.remove(id);
        self.policy.forget(id);
        self.refresher.forget(id);
        tracing::info!(city_id = %id, "City removed");
        self.events.emit(StoreEvent::Changed);
        self.persist_preferences().await;
        true
    }

    pub async fn move_city(&self, from: usize, to: usize) -> bool {
        if !self.store.write().move_city(from, to) {
            return false;
        }
        self.events.emit(StoreEvent::Changed);
        self.persist_preferences().await;
        true
    }

    pub fn next_city(&self) {
        self.store.write().next_city();
        self.events.emit(StoreEvent::Changed);
    }

    pub fn prev_city(&self) {
        self.store.write().prev_city();
        self.events.emit(StoreEvent::Changed);
    }

    pub fn set_current_index(&self, index: usize) -> bool {
        let changed = self.store.write().set_current_index(index);
        if changed {
            self.events.emit(StoreEvent::Changed);
        }
        changed
    }

    pub async fn set_unit(&self, unit: Unit) {
        *self.unit.lock() = unit;
        self.store.write().set_unit(unit);
        self.events.emit(StoreEvent::Changed);
        self.persist_preferences().await;
    }

    /// Replace the collection with records loaded for a signed-in user.
    ///
    /// Records are cached at their own fetch time so old data is not treated
    /// as fresh.
    pub fn load_from_server(&self, records: Vec<CityRecord>, current_city_id: Option<&str>) {
        for record in records.iter().filter(|r| r.last_updated > 0) {
            self.cache.set_at(record.clone(), record.last_updated);
        }
        self.store.write().load_from_server(records, current_city_id);
        self.events.emit(StoreEvent::Changed);
    }

    pub fn apply_background_update(&self, city_id: &str) -> bool {
        self.refresher.apply_background_update(city_id)
    }

    pub fn dismiss_background_update(&self, city_id: &str) -> bool {
        self.refresher.dismiss_background_update(city_id)
    }

    /// Mark an arbitrary named operation as busy.
    pub fn begin_busy(&self, scope: &str, key: Option<&str>, options: BusyOptions) -> BusyToken {
        let token = self.busy.begin_busy(scope, key, options);
        self.events.emit(StoreEvent::Busy(self.busy.snapshot()));
        token
    }

    pub fn end_busy(&self, token: BusyToken) -> bool {
        let ended = self.busy.end_busy(token);
        if ended {
            self.events.emit(StoreEvent::Busy(self.busy.snapshot()));
        }
        ended
    }

    pub fn busy_state(&self) -> BusySnapshot {
        self.busy.snapshot()
    }

    fn begin_exclusive(
        &self,
        scope: &str,
        key: Option<&str>,
        options: BusyOptions,
    ) -> Option<OperationGuard<'_>> {
        let guard = self.busy.try_guard(scope, key, options)?;
        self.events.emit(StoreEvent::Busy(self.busy.snapshot()));
        Some(OperationGuard {
            busy: &self.busy,
            events: &self.events,
            guard: Some(guard),
        })
    }

    fn manual_failure(
        &self,
        key: &str,
        name: &LocalizedLabel,
        id: &str,
        error: WeatherError,
    ) -> OperationOutcome {
        tracing::warn!(city_id = %id, error = %error, "Weather fetch failed");
        self.events.emit(StoreEvent::Notification(
            StatusMessage::new(key)
                .with_param("name", &name.en)
                .with_param("reason", error.user_message()),
        ));
        OperationOutcome::Error(OperationError::Fetch(error.to_string()))
    }

    async fn persist_preferences(&self) {
        let Some(sink) = &self.preferences else {
            return;
        };
        let preferences = self.preferences();
        if let Err(e) = sink.persist_preferences(&preferences).await {
            tracing::warn!(error = %e, "Failed to persist preferences");
        }
    }
}
