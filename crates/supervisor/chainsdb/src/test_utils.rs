//! Helpers shared by the unit tests of this crate.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes a test-writer tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; later calls are no-ops.
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
