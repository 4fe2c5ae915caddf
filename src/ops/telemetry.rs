//! Tracing bootstrap.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. The level argument overrides `RUST_LOG`;
/// repeated calls are harmless.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
