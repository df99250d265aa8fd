//! Logging setup.
//!
//! Structured logging via `tracing`, filtered with the standard `RUST_LOG`
//! environment variable. Defaults to `info` for this crate and `warn` for
//! dependencies.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Safe to call once per process; later
/// calls are ignored rather than panicking, which keeps tests quiet.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,dukabot=info,duka=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
