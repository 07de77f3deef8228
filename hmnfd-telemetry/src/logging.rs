//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// The level derives from the `Debug` parameter (`info` at zero, `debug`
/// above), and `RUST_LOG` takes precedence when set. Safe to call once;
/// later calls are ignored (useful in tests).
pub fn init(debug: u32) {
    let default_level = if debug > 0 { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
