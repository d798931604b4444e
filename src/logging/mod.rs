// Logging module for structured logging using the tracing crate

use std::error::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when RUST_LOG is unset
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize the tracing subscriber with human-readable output
///
/// The filter comes from `RUST_LOG`, falling back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// # Examples
///
/// ```
/// kura::logging::init_subscriber().ok();
/// tracing::info!("Application started");
/// ```
pub fn init_subscriber() -> Result<(), Box<dyn Error>> {
    init_subscriber_with(false)
}

/// Initialize the tracing subscriber, optionally emitting JSON lines
/// for log aggregation systems
pub fn init_subscriber_with(json: bool) -> Result<(), Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if json {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}
