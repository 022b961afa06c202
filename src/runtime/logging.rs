//! Opt-in tracing subscriber installation for hosts and tests.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a global fmt subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Later calls are no-ops, so tests can call this freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
