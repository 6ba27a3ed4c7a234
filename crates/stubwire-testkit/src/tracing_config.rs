//! Tracing setup for fixture tests.
//!
//! Only the first call in a test binary installs a subscriber; later calls are
//! no-ops, whichever variant they use.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset: lifecycle events at debug, the rest at info.
pub const DEFAULT_TEST_FILTER: &str =
    "info,stubwire_core=debug,stubwire_wiremock=debug,stubwire_testkit=debug";

#[derive(Clone, Copy)]
enum Format {
    Compact,
    Json,
}

fn install(filter: EnvFilter, format: Format) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(filter);
        let result = match format {
            Format::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_test_writer()
                        .with_ansi(true)
                        .compact(),
                )
                .try_init(),
            Format::Json => registry
                .with(tracing_subscriber::fmt::layer().with_test_writer().json())
                .try_init(),
        };
        // Another subscriber may already be installed by the test binary.
        drop(result);
    });
}

fn env_or_default() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER))
}

/// Initialize compact tracing for tests, honouring `RUST_LOG`.
///
/// ```rust
/// #[tokio::test]
/// async fn user_client_is_bound() {
///     stubwire_testkit::init_test_tracing();
///     // ...
/// }
/// ```
pub fn init_test_tracing() {
    install(env_or_default(), Format::Compact);
}

/// Initialize compact tracing with an explicit filter, ignoring `RUST_LOG`.
pub fn init_test_tracing_with_filter(filter: &str) {
    install(EnvFilter::new(filter), Format::Compact);
}

/// Initialize JSON tracing, for tests whose output is fed to log tooling.
pub fn init_test_tracing_json() {
    install(env_or_default(), Format::Json);
}

/// Initialize tracing with every event suppressed.
///
/// Useful for tests that provoke setup failures on purpose.
pub fn init_test_tracing_silent() {
    install(EnvFilter::new("off"), Format::Compact);
}
