//! Common logger configuration for the caseloot server process.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Initialize the global `tracing` logger.
///
/// - Prints enabled events and spans to stdout.
/// - Defaults to INFO/WARN/ERROR.
/// - `RUST_LOG` overrides module-level filtering (see [`Targets`]'s syntax);
///   falling that, the `LOG_LEVEL` env var (spec config surface) is parsed as
///   a single [`Level`] applied to every target.
///
/// Panics if a logger is already installed, which is expected to only happen
/// if this is called twice in the same process.
pub fn init() {
    try_init().expect("failed to set up logger");
}

/// Use in tests: skips setup entirely unless `RUST_LOG` is set, and tolerates
/// a logger already being installed by a previous test in the same binary.
pub fn init_for_testing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let _ = try_init();
}

pub fn try_init() -> Result<(), TryInitError> {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| Targets::from_str(&s).ok())
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .and_then(|s| Level::from_str(&s).ok())
                .map(|level| Targets::new().with_default(level))
        })
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        .with_ansi(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_log).try_init()
}
