//! Staleness and refresh throttling.
//!
//! Staleness asks whether a record is old enough to want new data.
//! Throttling asks whether we tried this city too recently, whatever its age.

use parking_lot::Mutex;
use std::collections::HashMap;

use skycast_core::RefreshConfig;

use crate::types::{now_ms, CityRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Records older than this are stale
    pub stale_after_ms: i64,
    /// Minimum gap between attempts for one city
    pub cooldown_ms: i64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self::from(&RefreshConfig::default())
    }
}

impl From<&RefreshConfig> for RefreshSettings {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            stale_after_ms: config.stale_after_minutes as i64 * 60 * 1000,
            cooldown_ms: config.throttle_seconds as i64 * 1000,
        }
    }
}

/// Refresh policy with a per-city attempt log.
#[derive(Debug)]
pub struct RefreshPolicy {
    settings: RefreshSettings,
    last_attempt: Mutex<HashMap<String, i64>>,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(RefreshSettings::default())
    }
}

impl RefreshPolicy {
    pub fn new(settings: RefreshSettings) -> Self {
        Self {
            settings,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_stale(&self, record: &CityRecord) -> bool {
        self.is_stale_at(record, now_ms())
    }

    pub fn is_stale_at(&self, record: &CityRecord, now: i64) -> bool {
        record.last_updated <= 0 || now - record.last_updated > self.settings.stale_after_ms
    }

    /// Check the cooldown for `city_id` and, if allowed, stamp the attempt.
    ///
    /// Two calls in a row for the same id yield `true` then `false`.
    pub fn can_attempt(&self, city_id: &str) -> bool {
        self.can_attempt_at(city_id, now_ms())
    }

    pub fn can_attempt_at(&self, city_id: &str, now: i64) -> bool {
        let mut attempts = self.last_attempt.lock();
        match attempts.get(city_id) {
            Some(&last) if now - last < self.settings.cooldown_ms => false,
            _ => {
                attempts.insert(city_id.to_string(), now);
                true
            }
        }
    }

    /// Stale and outside the cooldown. Fresh records never consume an attempt.
    pub fn should_auto_refresh(&self, record: &CityRecord) -> bool {
        self.should_auto_refresh_at(record, now_ms())
    }

    pub fn should_auto_refresh_at(&self, record: &CityRecord, now: i64) -> bool {
        self.is_stale_at(record, now) && self.can_attempt_at(&record.id, now)
    }

    /// Stamp a manual refresh so the auto-refresh cooldown restarts.
    pub fn mark_refreshed(&self, city_id: &str) {
        self.mark_refreshed_at(city_id, now_ms());
    }

    pub fn mark_refreshed_at(&self, city_id: &str, now: i64) {
        self.last_attempt.lock().insert(city_id.to_string(), now);
    }

    /// Drop the attempt log for a removed city.
    pub fn forget(&self, city_id: &str) {
        self.last_attempt.lock().remove(city_id);
    }

    pub fn last_attempt(&self, city_id: &str) -> Option<i64> {
        self.last_attempt.lock().get(city_id).copied()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::types::{FetchRequest, Unit, WeatherPayload};

    const MINUTE_MS: i64 = 60 * 1000;
    const HOUR_MS: i64 = 60 * MINUTE_MS;
    const T0: i64 = 1_700_000_000_000;

    fn record_updated_at(last_updated: i64) -> CityRecord {
        let request = FetchRequest {
            id: "city:40.7_-74.0".into(),
            lat: 40.7,
            lon: -74.0,
            unit: Unit::Metric,
            name: None,
            country: None,
        };
        CityRecord::from_fetch(&request, WeatherPayload::default(), false, last_updated)
    }

    #[test]
    fn test_never_fetched_is_stale() {
        let policy = RefreshPolicy::default();
        assert!(policy.is_stale_at(&record_updated_at(0), T0));
    }

    #[test]
    fn test_staleness_window() {
        let policy = RefreshPolicy::default();
        let record = record_updated_at(T0);
        assert!(!policy.is_stale_at(&record, T0 + 3 * HOUR_MS));
        assert!(policy.is_stale_at(&record, T0 + 3 * HOUR_MS + 1));
    }

    #[test]
    fn test_can_attempt_true_false_true() {
        let policy = RefreshPolicy::default();
        assert!(policy.can_attempt_at("a", T0));
        assert!(!policy.can_attempt_at("a", T0));
        assert!(!policy.can_attempt_at("a", T0 + MINUTE_MS - 1));
        assert!(policy.can_attempt_at("a", T0 + MINUTE_MS));
    }

    #[test]
    fn test_cooldown_is_per_city() {
        let policy = RefreshPolicy::default();
        assert!(policy.can_attempt_at("a", T0));
        assert!(policy.can_attempt_at("b", T0));
        assert!(!policy.can_attempt_at("a", T0 + 1));
    }

    #[test]
    fn test_fresh_record_never_auto_refreshes() {
        let policy = RefreshPolicy::default();
        let record = record_updated_at(T0);
        assert!(!policy.should_auto_refresh_at(&record, T0 + HOUR_MS));
        // A fresh check must not burn the attempt
        assert_eq!(policy.last_attempt(&record.id), None);
    }

    #[test]
    fn test_stale_record_auto_refreshes_once_per_cooldown() {
        let policy = RefreshPolicy::default();
        let record = record_updated_at(T0);
        let later = T0 + 4 * HOUR_MS;
        assert!(policy.should_auto_refresh_at(&record, later));
        assert!(!policy.should_auto_refresh_at(&record, later + 1));
        assert!(policy.should_auto_refresh_at(&record, later + MINUTE_MS));
    }

    #[test]
    fn test_manual_refresh_suppresses_auto_refresh() {
        let policy = RefreshPolicy::default();
        let record = record_updated_at(T0);
        let later = T0 + 4 * HOUR_MS;
        policy.mark_refreshed_at(&record.id, later);
        assert!(!policy.should_auto_refresh_at(&record, later + 30 * 1000));
    }

    #[test]
    fn test_forget_clears_cooldown() {
        let policy = RefreshPolicy::default();
        assert!(policy.can_attempt_at("a", T0));
        policy.forget("a");
        assert!(policy.can_attempt_at("a", T0));
    }
}
