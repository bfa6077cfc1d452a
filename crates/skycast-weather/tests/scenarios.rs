//! End-to-end flows through `WeatherService` with scripted collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use skycast_core::{Config, WeatherError};
use skycast_weather::{
    AddCityRequest, CityInfo, CityLocator, Coordinates, CurrentConditions, FetchRequest,
    LocalizedLabel, OperationError, OperationOutcome, StoreEvent, WeatherFetcher, WeatherPayload,
    WeatherService,
};

const HOUR_MS: i64 = 60 * 60 * 1000;

fn payload(temp: f64, updated_at: i64) -> WeatherPayload {
    WeatherPayload {
        current: CurrentConditions {
            temp,
            updated_at,
            ..CurrentConditions::default()
        },
        ..WeatherPayload::default()
    }
}

/// Hands out scripted results in call order; fails once the script runs out.
#[derive(Default)]
struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<WeatherPayload, WeatherError>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn with(results: Vec<Result<WeatherPayload, WeatherError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherFetcher for ScriptedFetcher {
    async fn fetch_weather(&self, _request: &FetchRequest) -> Result<WeatherPayload, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Err(WeatherError::ServiceUnavailable))
    }
}

/// Blocks every fetch until the gate is opened.
struct GatedFetcher {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl WeatherFetcher for GatedFetcher {
    async fn fetch_weather(&self, _request: &FetchRequest) -> Result<WeatherPayload, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(payload(24.0, 1_700_000_000_000))
    }
}

struct NoLocator;

#[async_trait]
impl CityLocator for NoLocator {
    async fn fetch_city_by_coordinates(
        &self,
        lat: f64,
        lon: f64,
        _lang: &str,
    ) -> Result<CityInfo, WeatherError> {
        Err(WeatherError::LocationNotFound(format!("{lat},{lon}")))
    }
}

fn service(fetcher: Arc<dyn WeatherFetcher>) -> WeatherService {
    WeatherService::new(&Config::default(), fetcher, Arc::new(NoLocator))
}

fn request(lat: f64, lon: f64, name: &str) -> AddCityRequest {
    AddCityRequest::new(
        Coordinates::new(lat, lon).unwrap(),
        LocalizedLabel::uniform(name),
        LocalizedLabel::uniform("Country"),
    )
}

#[tokio::test]
async fn test_background_update_waits_for_user() {
    let observed_at = 1_700_000_000_000;
    let fetcher = ScriptedFetcher::with(vec![
        Ok(payload(12.0, observed_at)),
        Ok(payload(17.0, observed_at + 4 * HOUR_MS)),
    ]);
    let service = service(fetcher.clone());
    let id = "city:40.7_-74.0";

    let outcome = service.add_city(request(40.7, -74.0, "New York")).await;
    assert_eq!(outcome, OperationOutcome::Added { index: 0 });
    let t0 = service.city(id).unwrap().last_updated;

    // Four hours later the record is stale and outside the throttle window
    let t1 = t0 + 4 * HOUR_MS;
    let record = service.city(id).unwrap();
    assert!(service.policy().is_stale_at(&record, t1));
    assert!(service.policy().last_attempt(id).unwrap() <= t1 - 60 * 1000);

    let report = service.refresher().tick_at(t1).await;
    assert_eq!(report.staged, 1);
    assert_eq!(fetcher.calls(), 2);

    let record = service.city(id).unwrap();
    assert_eq!(record.last_updated, t1);
    assert_eq!(record.current.temp, 12.0);
    let snapshot = service.snapshot();
    assert_eq!(snapshot.pending_updates.len(), 1);
    assert_eq!(snapshot.pending_updates[0].city_id, id);

    assert!(service.apply_background_update(id));
    let record = service.city(id).unwrap();
    assert_eq!(record.current.temp, 17.0);
    assert!(service.snapshot().pending_updates.is_empty());
}

#[tokio::test]
async fn test_sixteenth_city_is_rejected() {
    let results = (0..16).map(|i| Ok(payload(i as f64, 1))).collect();
    let service = service(ScriptedFetcher::with(results));

    for i in 0..15 {
        let outcome = service.add_city(request(i as f64, 10.0, "City")).await;
        assert_eq!(outcome, OperationOutcome::Added { index: i });
    }

    let outcome = service.add_city(request(50.0, 10.0, "One too many")).await;
    assert_eq!(outcome, OperationOutcome::MaxCities);
    assert_eq!(service.cities().len(), 15);
}

#[tokio::test]
async fn test_concurrent_add_is_rejected_without_second_fetch() {
    let fetcher = Arc::new(GatedFetcher {
        gate: Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let service = Arc::new(service(fetcher.clone()));
    let id = "city:31.8_35.2";

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.add_city(request(31.77, 35.21, "Jerusalem")).await })
    };
    while !service.busy().is_busy_key("add", id) {
        tokio::task::yield_now().await;
    }

    let second = service.add_city(request(31.78, 35.22, "Jerusalem")).await;
    assert_eq!(
        second,
        OperationOutcome::Error(OperationError::OperationInProgress)
    );

    fetcher.gate.notify_one();
    assert_eq!(first.await.unwrap(), OperationOutcome::Added { index: 0 });
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(!service.busy().is_busy());
}

#[tokio::test]
async fn test_failed_manual_refresh_keeps_data() {
    let fetcher = ScriptedFetcher::with(vec![Ok(payload(12.0, 1))]);
    let service = service(fetcher);
    let id = "city:40.7_-74.0";
    service.add_city(request(40.7, -74.0, "New York")).await;
    let mut events = service.subscribe();

    let outcome = service.refresh_city(id, true).await;
    assert!(matches!(
        outcome,
        OperationOutcome::Error(OperationError::Fetch(_))
    ));
    assert_eq!(service.city(id).unwrap().current.temp, 12.0);
    assert!(!service.busy().is_busy());

    let mut notifications = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::Notification(message) = event {
            notifications.push(message);
        }
    }
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].key, "error.refresh_failed");
    assert_eq!(notifications[0].params["name"], "New York");
}

#[tokio::test]
async fn test_removing_current_city_keeps_index_in_bounds() {
    let results = (0..3).map(|i| Ok(payload(i as f64, 1))).collect();
    let service = service(ScriptedFetcher::with(results));
    service.add_city(request(1.0, 1.0, "A")).await;
    service.add_city(request(2.0, 2.0, "B")).await;
    service.add_city(request(3.0, 3.0, "C")).await;

    assert!(service.remove_city("city:3.0_3.0").await);
    assert_eq!(service.snapshot().current_index, 1);
    assert!(service.remove_city("city:1.0_1.0").await);
    assert_eq!(service.snapshot().current_index, 0);
    assert!(service.remove_city("city:2.0_2.0").await);
    assert_eq!(service.snapshot().current_index, 0);
    assert!(service.snapshot().cities.is_empty());
}

#[tokio::test]
async fn test_location_failure_notifies() {
    let service = service(ScriptedFetcher::with(vec![]));
    let mut events = service.subscribe();

    let outcome = service.add_current_location(32.79, 34.99).await;
    assert!(matches!(
        outcome,
        OperationOutcome::Error(OperationError::Location(_))
    ));
    assert!(service.cities().is_empty());

    let notified = std::iter::from_fn(|| events.try_recv().ok())
        .any(|event| matches!(event, StoreEvent::Notification(m) if m.key == "error.location_failed"));
    assert!(notified);
}
