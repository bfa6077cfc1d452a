//! Periodic background refresh of saved cities.
//!
//! Each tick picks cities whose data is older than the background threshold
//! and that the throttle allows, fetches them in small batches, and either
//! applies the result silently or stages it as a pending update when the
//! user has already seen an older observation for that city.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use skycast_core::{RefreshConfig, WeatherError};

use crate::cache::WeatherCache;
use crate::events::{EventBus, StoreEvent};
use crate::provider::WeatherFetcher;
use crate::refresh::RefreshPolicy;
use crate::store::WeatherStore;
use crate::types::{now_ms, CityRecord, FetchRequest, PendingBackgroundUpdate, WeatherPayload};

const MINUTE_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundSettings {
    /// Zero disables the loop in `run`; `tick` still works
    pub interval: Duration,
    pub threshold_ms: i64,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self::from(&RefreshConfig::default())
    }
}

impl From<&RefreshConfig> for BackgroundSettings {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.background_interval_minutes * 60),
            threshold_ms: config.background_threshold_minutes as i64 * MINUTE_MS,
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub candidates: usize,
    /// Applied directly to the displayed record
    pub applied: usize,
    /// Held back as a pending update
    pub staged: usize,
    /// Fetched data was no newer than what is displayed
    pub unchanged: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn changed(&self) -> bool {
        self.applied + self.staged + self.unchanged + self.failed > 0
    }
}

enum Settled {
    Applied,
    Staged,
    Unchanged,
    Gone,
}

pub struct BackgroundRefresher {
    settings: BackgroundSettings,
    store: Arc<RwLock<WeatherStore>>,
    cache: Arc<WeatherCache>,
    policy: Arc<RefreshPolicy>,
    fetcher: Arc<dyn WeatherFetcher>,
    events: EventBus,
    /// Provider update time of the payload last shown for each city
    last_seen: Mutex<HashMap<String, i64>>,
}

impl std::fmt::Debug for BackgroundRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRefresher")
            .field("settings", &self.settings)
            .field("tracked", &self.last_seen.lock().len())
            .finish_non_exhaustive()
    }
}

impl BackgroundRefresher {
    pub fn new(
        settings: BackgroundSettings,
        store: Arc<RwLock<WeatherStore>>,
        cache: Arc<WeatherCache>,
        policy: Arc<RefreshPolicy>,
        fetcher: Arc<dyn WeatherFetcher>,
        events: EventBus,
    ) -> Self {
        Self {
            settings,
            store,
            cache,
            policy,
            fetcher,
            events,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BackgroundSettings {
        &self.settings
    }

    /// Tick every `interval` until `cancel` fires. The first tick is immediate.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.settings.interval.is_zero() {
            tracing::info!("Background refresh disabled");
            return;
        }

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "Background refresher started (every {:?}, threshold {} min)",
            self.settings.interval,
            self.settings.threshold_ms / MINUTE_MS
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Background refresher stopped");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    tracing::debug!(?report, "background_tick");
                }
            }
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(now_ms()).await
    }

    /// One scan at simulated time `now`.
    pub async fn tick_at(&self, now: i64) -> TickReport {
        let candidates = self.candidates_at(now);
        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };
        if candidates.is_empty() {
            return report;
        }

        for (i, batch) in candidates.chunks(self.settings.batch_size).enumerate() {
            if i > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }

            let results = join_all(batch.iter().map(|request| async move {
                (request, self.fetcher.fetch_weather(request).await)
            }))
            .await;

            for (request, result) in results {
                match result {
                    Ok(payload) => match self.settle(request, payload, now) {
                        Settled::Applied => report.applied += 1,
                        Settled::Staged => report.staged += 1,
                        Settled::Unchanged => report.unchanged += 1,
                        Settled::Gone => {}
                    },
                    Err(e) => {
                        self.record_failure(request, &e, now);
                        report.failed += 1;
                    }
                }
            }
        }

        if report.changed() {
            self.events.emit(StoreEvent::Changed);
        }
        report
    }

    /// Remember that the user has seen `record`'s payload.
    pub fn observe(&self, record: &CityRecord) {
        self.last_seen
            .lock()
            .insert(record.id.clone(), record.current.updated_at);
    }

    pub fn last_seen(&self, city_id: &str) -> Option<i64> {
        self.last_seen.lock().get(city_id).copied()
    }

    pub fn forget(&self, city_id: &str) {
        self.last_seen.lock().remove(city_id);
    }

    /// Merge the staged payload for `city_id` into its record.
    pub fn apply_background_update(&self, city_id: &str) -> bool {
        self.apply_background_update_at(city_id, now_ms())
    }

    pub fn apply_background_update_at(&self, city_id: &str, now: i64) -> bool {
        let updated = {
            let mut store = self.store.write();
            let Some(pending) = store.take_pending(city_id) else {
                return false;
            };
            store.update_city(city_id, |city| city.apply_payload(pending.new_data, now));
            store.get(city_id).cloned()
        };

        if let Some(record) = updated {
            self.observe(&record);
            self.cache.set_at(record, now);
        }
        self.events.emit(StoreEvent::Changed);
        true
    }

    /// Drop the staged payload for `city_id`; the displayed record is untouched.
    ///
    /// `last_seen` keeps the observation the user is looking at, so a later
    /// fetch of the same data is staged again rather than applied.
    pub fn dismiss_background_update(&self, city_id: &str) -> bool {
        if self.store.write().take_pending(city_id).is_none() {
            return false;
        }
        self.events.emit(StoreEvent::Changed);
        true
    }

    fn candidates_at(&self, now: i64) -> Vec<FetchRequest> {
        let store = self.store.read();
        store
            .cities()
            .iter()
            .filter(|city| now - city.last_updated > self.settings.threshold_ms)
            .filter(|city| self.policy.can_attempt_at(&city.id, now))
            .map(CityRecord::fetch_request)
            .collect()
    }

    fn settle(&self, request: &FetchRequest, payload: WeatherPayload, now: i64) -> Settled {
        let new_ts = payload.current.updated_at;
        let prior = self.last_seen(&request.id);

        let mut store = self.store.write();
        let Some(existing) = store.get(&request.id).cloned() else {
            // Removed while the fetch was in flight
            return Settled::Gone;
        };

        let mut fresh = existing.clone();
        fresh.apply_payload(payload.clone(), now);
        self.cache.set_at(fresh, now);

        match prior {
            None => {
                store.update_city(&request.id, |city| city.apply_payload(payload, now));
                self.last_seen.lock().insert(request.id.clone(), new_ts);
                tracing::debug!(city_id = %request.id, "background_update_applied");
                Settled::Applied
            }
            Some(seen) if new_ts > seen => {
                store.stage_pending(PendingBackgroundUpdate {
                    city_id: request.id.clone(),
                    city_name: existing.name,
                    new_data: payload,
                    timestamp: now,
                });
                store.update_city(&request.id, |city| city.last_updated = now);
                tracing::debug!(city_id = %request.id, "background_update_staged");
                Settled::Staged
            }
            Some(_) => {
                // Nothing newer than what is displayed
                store.update_city(&request.id, |city| city.last_updated = now);
                Settled::Unchanged
            }
        }
    }

    fn record_failure(&self, request: &FetchRequest, error: &WeatherError, now: i64) {
        tracing::debug!(city_id = %request.id, error = %error, "background_refresh_failed");
        self.store
            .write()
            .update_city(&request.id, |city| city.last_updated = now);
    }
}
