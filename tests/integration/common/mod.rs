// Shared setup for the integration tests.

use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness. Honours `RUST_LOG` and
/// is silent by default; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")))
        .with_test_writer()
        .try_init();
}
