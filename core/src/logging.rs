//! Logging setup
//!
//! The filter comes from `PYBRIDGE_LOG`, then `RUST_LOG`, then defaults to
//! `info`. Output goes to stderr so it never mixes with interpreter output
//! routed to stdout by the console host.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "PYBRIDGE_LOG";

/// Install the global subscriber
///
/// Safe to call more than once; the library may be loaded into a process that
/// already has a subscriber, in which case that one is kept.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
