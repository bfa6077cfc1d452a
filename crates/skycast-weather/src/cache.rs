//! In-memory TTL cache of city weather records.
//!
//! Entries are fresh for `fresh_window` after they were written. Expired
//! entries read as absent; removing them is left to the cleanup pass, which
//! runs opportunistically from `get`/`set` at most once per
//! `cleanup_interval`. Nothing is persisted across restarts.

use parking_lot::Mutex;
use std::collections::HashMap;

use skycast_core::CacheConfig;

use crate::types::{now_ms, CityRecord};

const MINUTE_MS: i64 = 60 * 1000;

/// Cache tuning, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub fresh_window_ms: i64,
    pub max_entries: usize,
    pub cleanup_interval_ms: i64,
    /// Age limit applied once occupancy crosses `pressure_ratio`
    pub pressure_window_ms: i64,
    pub pressure_ratio: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            fresh_window_ms: config.fresh_window_minutes as i64 * MINUTE_MS,
            max_entries: config.max_entries,
            cleanup_interval_ms: config.cleanup_interval_minutes as i64 * MINUTE_MS,
            pressure_window_ms: config.pressure_window_minutes as i64 * MINUTE_MS,
            pressure_ratio: config.pressure_ratio,
        }
    }
}

/// Diagnostic snapshot of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub oldest_entry_age_ms: Option<i64>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: CityRecord,
    timestamp: i64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    last_cleanup: i64,
}

/// TTL cache keyed by city id.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct WeatherCache {
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

impl Default for WeatherCache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl WeatherCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Cached record for `id`, or `None` if absent or older than the
    /// freshness window.
    pub fn get(&self, id: &str) -> Option<CityRecord> {
        self.get_at(id, now_ms())
    }

    pub fn get_at(&self, id: &str, now: i64) -> Option<CityRecord> {
        let mut state = self.state.lock();
        self.maybe_cleanup(&mut state, now);

        let entry = state.entries.get(id)?;
        if now - entry.timestamp < self.settings.fresh_window_ms {
            tracing::debug!(city_id = %id, "cache_hit");
            Some(entry.data.clone())
        } else {
            tracing::debug!(city_id = %id, "cache_expired");
            None
        }
    }

    /// Store `record` under its id, replacing any previous entry.
    pub fn set(&self, record: CityRecord) {
        self.set_at(record, now_ms());
    }

    pub fn set_at(&self, record: CityRecord, now: i64) {
        let mut state = self.state.lock();
        state.entries.insert(
            record.id.clone(),
            CacheEntry {
                data: record,
                timestamp: now,
            },
        );
        self.maybe_cleanup(&mut state, now);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.state.lock().entries.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(now_ms())
    }

    pub fn stats_at(&self, now: i64) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            oldest_entry_age_ms: state.entries.values().map(|e| now - e.timestamp).max(),
        }
    }

    /// Run a cleanup pass now, ignoring the cleanup interval.
    /// Returns the number of evicted entries.
    pub fn cleanup_at(&self, now: i64) -> usize {
        let mut state = self.state.lock();
        self.cleanup(&mut state, now)
    }

    fn maybe_cleanup(&self, state: &mut CacheState, now: i64) {
        if now - state.last_cleanup < self.settings.cleanup_interval_ms {
            return;
        }
        self.cleanup(state, now);
    }

    fn cleanup(&self, state: &mut CacheState, now: i64) -> usize {
        state.last_cleanup = now;
        let before = state.entries.len();

        let fresh_window = self.settings.fresh_window_ms;
        state
            .entries
            .retain(|_, entry| now - entry.timestamp < fresh_window);

        let pressure_threshold =
            (self.settings.max_entries as f64 * self.settings.pressure_ratio) as usize;
        if state.entries.len() > pressure_threshold {
            let pressure_window = self.settings.pressure_window_ms;
            state
                .entries
                .retain(|_, entry| now - entry.timestamp < pressure_window);
        }

        if state.entries.len() > self.settings.max_entries {
            let mut by_age: Vec<(String, i64)> = state
                .entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.timestamp))
                .collect();
            by_age.sort_by_key(|(_, timestamp)| *timestamp);

            let excess = state.entries.len() - self.settings.max_entries;
            for (id, _) in by_age.into_iter().take(excess) {
                state.entries.remove(&id);
            }
        }

        let evicted = before - state.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = state.entries.len(), "cache_cleanup");
        }
        evicted
    }
}
