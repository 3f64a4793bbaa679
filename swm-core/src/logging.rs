//! Global `tracing` subscriber setup: stdout-formatted layer, `RUST_LOG`-
//! driven level filtering, defaulting to `INFO` when unset or unparseable.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the global logger. Panics if a logger is already set.
pub fn init(log_level: Option<&str>) {
    try_init(log_level).expect("failed to set up tracing subscriber");
}

pub fn try_init(
    log_level: Option<&str>,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = log_level
        .and_then(|directive| Targets::from_str(directive).ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_log).try_init()
}
