//! Shared helpers for the test suites.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs an env-filtered fmt subscriber once per test binary.
///
/// Controlled through `RUST_LOG`; defaults to warnings only so the suites
/// stay quiet unless a failure is being chased.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
