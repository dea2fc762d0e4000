//! Shared setup for the tierq demo binaries.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// - Debug builds: human-readable output
/// - Release builds: JSON lines for log aggregation
///
/// The level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}
