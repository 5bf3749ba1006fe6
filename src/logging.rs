//! Tracing setup for the binaries.
//!
//! Both binaries log to stderr. For the driver agent this is mandatory:
//! stdout carries protocol lines only.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Filter from `RUST_LOG`, else the configured level.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(settings: &LoggingSettings) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Subscriber for a driver agent: no ANSI, stderr only, since the main
/// process captures the stream into error messages.
pub fn init_agent(settings: &LoggingSettings) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .without_time(),
        )
        .try_init();
}
