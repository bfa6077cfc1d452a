use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use skycast_core::Config;
use skycast_weather::{
    AddCityRequest, Coordinates, LocalizedLabel, NominatimLocator, OpenMeteoFetcher,
    OperationOutcome, StoreEvent, WeatherService,
};

/// Parse a "lat,lon" argument.
fn parse_coordinates(arg: &str) -> Result<Coordinates> {
    let (lat, lon) = arg
        .split_once(',')
        .with_context(|| format!("expected lat,lon but got {:?}", arg))?;
    let lat: f64 = lat.trim().parse().context("invalid latitude")?;
    let lon: f64 = lon.trim().parse().context("invalid longitude")?;
    Ok(Coordinates::new(lat, lon)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize core
    skycast_core::init()?;
    let (config, _) = match Config::load_validated() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    let fetcher = Arc::new(OpenMeteoFetcher::from_config(&config.provider)?);
    let locator = Arc::new(NominatimLocator::from_config(&config.provider)?);
    let service = Arc::new(WeatherService::new(&config, fetcher, locator));

    tracing::info!("SkyCast started");
    println!("SkyCast weather core");
    println!("  Config directory: {}", config.config_dir.display());

    for arg in std::env::args().skip(1) {
        let coordinates = parse_coordinates(&arg)?;
        let label = LocalizedLabel::uniform(arg.clone());
        let request = AddCityRequest::new(coordinates, label, LocalizedLabel::default());
        match service.add_city(request).await {
            OperationOutcome::Added { index } => {
                if let Some(city) = service.cities().get(index) {
                    println!(
                        "  {} {:.1}°{} ({})",
                        city.id,
                        city.display_temp(),
                        city.unit.temperature_symbol(),
                        city.current.condition.message_key()
                    );
                }
            }
            other => println!("  {}: {:?}", arg, other),
        }
    }

    // Background refresh until Ctrl+C
    let cancel = CancellationToken::new();
    let refresher = service.refresher();
    let refresh_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { refresher.run(cancel).await })
    };

    let mut events = service.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(StoreEvent::Changed) => {
                    let snapshot = service.snapshot();
                    for pending in &snapshot.pending_updates {
                        println!("  Newer weather for {}", pending.city_name.en);
                    }
                }
                Ok(StoreEvent::Notification(message)) => println!("  ! {}", message.key),
                Ok(StoreEvent::Busy(_)) => {}
                Err(e) => tracing::debug!("event stream lagged: {}", e),
            }
        }
    }

    // Graceful shutdown
    cancel.cancel();
    refresh_task.await.context("background refresher panicked")?;
    tracing::info!("SkyCast stopped");

    Ok(())
}
