pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, ProviderConfig, RefreshConfig, StoreConfig, Unit, ValidationResult,
};
pub use error::{AppError, ConfigError, NetworkError, ReqwestErrorExt, WeatherError};

use anyhow::Result;

/// Initialize logging for the process.
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once.
pub fn init() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    tracing::info!("SkyCast core initialized");
    Ok(())
}
