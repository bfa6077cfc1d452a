//! The ordered city collection the UI renders from.
//!
//! Plain data with `&mut self` mutations; `WeatherService` owns it behind a
//! lock and publishes change events.

use crate::types::{CityRecord, PendingBackgroundUpdate, Unit};

pub const DEFAULT_MAX_CITIES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { index: usize },
    Exists,
    MaxCities,
}

#[derive(Debug, Clone)]
pub struct WeatherStore {
    cities: Vec<CityRecord>,
    current_index: usize,
    max_cities: usize,
    pending: Vec<PendingBackgroundUpdate>,
}

impl Default for WeatherStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CITIES)
    }
}

impl WeatherStore {
    pub fn new(max_cities: usize) -> Self {
        Self {
            cities: Vec::new(),
            current_index: 0,
            max_cities,
            pending: Vec::new(),
        }
    }

    pub fn cities(&self) -> &[CityRecord] {
        &self.cities
    }

    pub fn city_ids(&self) -> Vec<String> {
        self.cities.iter().map(|c| c.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn max_cities(&self) -> usize {
        self.max_cities
    }

    pub fn is_full(&self) -> bool {
        self.cities.len() >= self.max_cities
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&CityRecord> {
        self.cities.get(self.current_index)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&CityRecord> {
        self.cities.iter().find(|c| c.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.cities.iter().position(|c| c.id == id)
    }

    /// Append `record` and select it.
    pub fn add_city(&mut self, record: CityRecord) -> AddOutcome {
        if self.contains(&record.id) {
            return AddOutcome::Exists;
        }
        if self.is_full() {
            return AddOutcome::MaxCities;
        }

        if record.is_current_location {
            for city in &mut self.cities {
                city.is_current_location = false;
            }
        }

        self.cities.push(record);
        self.current_index = self.cities.len() - 1;
        AddOutcome::Added {
            index: self.current_index,
        }
    }

    /// Apply `update` to the record with `id`. Returns false if absent.
    pub fn update_city<F>(&mut self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut CityRecord),
    {
        match self.cities.iter_mut().find(|c| c.id == id) {
            Some(city) => {
                update(city);
                true
            }
            None => false,
        }
    }

    /// Flag `id` as the current location and select it, clearing the flag
    /// everywhere else. Returns false if absent.
    pub fn mark_current_location(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        for (i, city) in self.cities.iter_mut().enumerate() {
            city.is_current_location = i == index;
        }
        self.current_index = index;
        true
    }

    /// Remove the record with `id`, keeping `current_index` on a valid,
    /// adjacent city.
    pub fn remove_city(&mut self, id: &str) -> Option<CityRecord> {
        let index = self.position(id)?;
        let removed = self.cities.remove(index);
        self.pending.retain(|p| p.city_id != id);

        if index <= self.current_index {
            self.current_index = self.current_index.saturating_sub(1);
        }
        self.clamp_index();
        Some(removed)
    }

    /// Move the city at `from` to position `to`; the selected city stays selected.
    pub fn move_city(&mut self, from: usize, to: usize) -> bool {
        if from >= self.cities.len() || to >= self.cities.len() {
            return false;
        }
        if from == to {
            return true;
        }

        let selected = self.current().map(|c| c.id.clone());
        let city = self.cities.remove(from);
        self.cities.insert(to, city);

        if let Some(index) = selected.and_then(|id| self.position(&id)) {
            self.current_index = index;
        }
        true
    }

    /// Out-of-range indices are ignored.
    pub fn set_current_index(&mut self, index: usize) -> bool {
        if index >= self.cities.len() {
            return false;
        }
        self.current_index = index;
        true
    }

    pub fn next_city(&mut self) {
        if self.cities.len() <= 1 {
            return;
        }
        self.current_index = (self.current_index + 1) % self.cities.len();
    }

    pub fn prev_city(&mut self) {
        if self.cities.len() <= 1 {
            return;
        }
        let len = self.cities.len();
        self.current_index = (self.current_index + len - 1) % len;
    }

    /// Replace the whole collection, e.g. after sign-in.
    ///
    /// Duplicate ids keep their first occurrence; the list is cut to
    /// `max_cities`. The current index follows `current_city_id` when given
    /// and present, else 0.
    pub fn load_from_server(&mut self, records: Vec<CityRecord>, current_city_id: Option<&str>) {
        let mut cities: Vec<CityRecord> = Vec::with_capacity(records.len().min(self.max_cities));
        let mut seen_current_location = false;

        for mut record in records {
            if cities.len() >= self.max_cities {
                break;
            }
            if cities.iter().any(|c| c.id == record.id) {
                continue;
            }
            if record.is_current_location {
                if seen_current_location {
                    record.is_current_location = false;
                }
                seen_current_location = true;
            }
            cities.push(record);
        }

        self.cities = cities;
        self.pending.clear();
        self.current_index = current_city_id
            .and_then(|id| self.position(id))
            .unwrap_or(0);
    }

    pub fn set_unit(&mut self, unit: Unit) {
        for city in &mut self.cities {
            city.unit = unit;
        }
    }

    pub fn pending_updates(&self) -> &[PendingBackgroundUpdate] {
        &self.pending
    }

    pub fn pending_for(&self, city_id: &str) -> Option<&PendingBackgroundUpdate> {
        self.pending.iter().find(|p| p.city_id == city_id)
    }

    /// Stage `update`, replacing an older staged update for the same city.
    pub fn stage_pending(&mut self, update: PendingBackgroundUpdate) {
        self.pending.retain(|p| p.city_id != update.city_id);
        self.pending.push(update);
    }

    pub fn take_pending(&mut self, city_id: &str) -> Option<PendingBackgroundUpdate> {
        let index = self.pending.iter().position(|p| p.city_id == city_id)?;
        Some(self.pending.remove(index))
    }

    fn clamp_index(&mut self) {
        if self.cities.is_empty() {
            self.current_index = 0;
        } else if self.current_index >= self.cities.len() {
            self.current_index = self.cities.len() - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::types::{city_id, FetchRequest, LocalizedLabel, WeatherPayload};

    fn city(lat: f64, lon: f64) -> CityRecord {
        let request = FetchRequest {
            id: city_id(lat, lon),
            lat,
            lon,
            unit: Unit::Metric,
            name: Some(LocalizedLabel::uniform(format!("{lat},{lon}"))),
            country: None,
        };
        CityRecord::from_fetch(&request, WeatherPayload::default(), false, 1)
    }

    fn store_with(n: usize) -> WeatherStore {
        let mut store = WeatherStore::default();
        for i in 0..n {
            store.add_city(city(i as f64, 0.0));
        }
        store
    }

    fn pending(id: &str) -> PendingBackgroundUpdate {
        PendingBackgroundUpdate {
            city_id: id.to_string(),
            city_name: LocalizedLabel::uniform(id),
            new_data: WeatherPayload::default(),
            timestamp: 1,
        }
    }

    #[test]
    fn test_add_selects_new_city() {
        let mut store = WeatherStore::default();
        assert_eq!(store.add_city(city(1.0, 1.0)), AddOutcome::Added { index: 0 });
        assert_eq!(store.add_city(city(2.0, 2.0)), AddOutcome::Added { index: 1 });
        assert_eq!(store.current_index(), 1);
    }

    #[test]
    fn test_add_duplicate_is_exists() {
        let mut store = WeatherStore::default();
        store.add_city(city(31.77, 35.21));
        assert_eq!(store.add_city(city(31.78, 35.22)), AddOutcome::Exists);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_beyond_capacity() {
        let mut store = store_with(15);
        assert_eq!(store.add_city(city(50.0, 50.0)), AddOutcome::MaxCities);
        assert_eq!(store.len(), 15);
    }

    #[test]
    fn test_only_one_current_location() {
        let mut store = WeatherStore::default();
        let mut here = city(1.0, 1.0);
        here.is_current_location = true;
        store.add_city(here);

        let mut moved = city(2.0, 2.0);
        moved.is_current_location = true;
        store.add_city(moved);

        let flagged: Vec<_> = store
            .cities()
            .iter()
            .filter(|c| c.is_current_location)
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(flagged, vec![city_id(2.0, 2.0)]);
    }

    #[test]
    fn test_mark_current_location_moves_flag() {
        let mut store = store_with(3);
        let ids = store.city_ids();
        assert!(store.mark_current_location(&ids[0]));
        assert!(store.mark_current_location(&ids[2]));

        let flagged: Vec<_> = store
            .cities()
            .iter()
            .filter(|c| c.is_current_location)
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(flagged, vec![ids[2].clone()]);
        assert_eq!(store.current_index(), 2);
        assert!(!store.mark_current_location("city:89.0_0.0"));
    }

    #[test]
    fn test_remove_before_current_shifts_pointer() {
        let mut store = store_with(4);
        store.set_current_index(2);
        store.remove_city(&city_id(0.0, 0.0));
        assert_eq!(store.current_index(), 1);
        assert_eq!(store.current().unwrap().id, city_id(2.0, 0.0));
    }

    #[test]
    fn test_remove_current_moves_to_previous() {
        let mut store = store_with(3);
        store.set_current_index(1);
        store.remove_city(&city_id(1.0, 0.0));
        assert_eq!(store.current_index(), 0);
    }

    #[test]
    fn test_remove_after_current_keeps_pointer() {
        let mut store = store_with(3);
        store.set_current_index(0);
        store.remove_city(&city_id(2.0, 0.0));
        assert_eq!(store.current_index(), 0);
    }

    #[test]
    fn test_remove_keeps_index_in_bounds() {
        for len in 1..6 {
            for current in 0..len {
                for victim in 0..len {
                    let mut store = store_with(len);
                    store.set_current_index(current);
                    store.remove_city(&city_id(victim as f64, 0.0));
                    if store.is_empty() {
                        assert_eq!(store.current_index(), 0);
                    } else {
                        assert!(store.current_index() < store.len());
                    }
                }
            }
        }
    }

    #[test]
    fn test_remove_drops_pending_update() {
        let mut store = store_with(2);
        let id = city_id(0.0, 0.0);
        store.stage_pending(pending(&id));
        store.remove_city(&id);
        assert!(store.pending_updates().is_empty());
    }

    #[test]
    fn test_remove_unknown_returns_none() {
        let mut store = store_with(2);
        assert!(store.remove_city("city:99.0_99.0").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_next_prev_wrap() {
        let mut store = store_with(3);
        assert_eq!(store.current_index(), 2);
        store.next_city();
        assert_eq!(store.current_index(), 0);
        store.prev_city();
        assert_eq!(store.current_index(), 2);
    }

    #[test]
    fn test_next_prev_noop_on_small_collections() {
        let mut store = WeatherStore::default();
        store.next_city();
        store.prev_city();
        assert_eq!(store.current_index(), 0);

        let mut store = store_with(1);
        store.next_city();
        assert_eq!(store.current_index(), 0);
    }

    #[test]
    fn test_move_city_keeps_selection() {
        let mut store = store_with(4);
        store.set_current_index(1);
        let selected = store.current().unwrap().id.clone();

        assert!(store.move_city(3, 0));
        assert_eq!(store.current().unwrap().id, selected);
        assert_eq!(store.cities()[0].id, city_id(3.0, 0.0));
        assert!(!store.move_city(0, 9));
    }

    #[test]
    fn test_set_current_index_out_of_range() {
        let mut store = store_with(2);
        assert!(!store.set_current_index(2));
        assert_eq!(store.current_index(), 1);
    }

    #[test]
    fn test_load_from_server_selects_current_city() {
        let mut store = store_with(1);
        store.stage_pending(pending(&city_id(0.0, 0.0)));

        let records = vec![city(10.0, 0.0), city(11.0, 0.0), city(12.0, 0.0)];
        store.load_from_server(records, Some(&city_id(11.0, 0.0)));
        assert_eq!(store.len(), 3);
        assert_eq!(store.current_index(), 1);
        assert!(store.pending_updates().is_empty());

        store.load_from_server(vec![city(10.0, 0.0)], Some("city:nope"));
        assert_eq!(store.current_index(), 0);
    }

    #[test]
    fn test_load_from_server_dedupes_and_caps() {
        let mut store = WeatherStore::new(2);
        let records = vec![city(1.0, 0.0), city(1.0, 0.0), city(2.0, 0.0), city(3.0, 0.0)];
        store.load_from_server(records, None);
        assert_eq!(store.city_ids(), vec![city_id(1.0, 0.0), city_id(2.0, 0.0)]);
    }

    #[test]
    fn test_stage_pending_replaces_previous() {
        let mut store = store_with(1);
        let id = city_id(0.0, 0.0);
        store.stage_pending(pending(&id));
        let mut newer = pending(&id);
        newer.timestamp = 2;
        store.stage_pending(newer);

        assert_eq!(store.pending_updates().len(), 1);
        assert_eq!(store.take_pending(&id).unwrap().timestamp, 2);
        assert!(store.take_pending(&id).is_none());
    }

    #[test]
    fn test_set_unit_applies_to_all() {
        let mut store = store_with(2);
        store.set_unit(Unit::Imperial);
        assert!(store.cities().iter().all(|c| c.unit == Unit::Imperial));
    }
}
