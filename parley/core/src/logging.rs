//! Logging Setup
//!
//! Tracing initialization shared by the daemon and any embedding binary.
//! `RUST_LOG` takes precedence over the supplied level.

use tracing_subscriber::EnvFilter;

/// Initialize process-wide logging to stderr.
///
/// Call once at startup. The filter comes from `RUST_LOG` when set,
/// otherwise from `level`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize logging for tests (captured per test, never panics on
/// repeated calls)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
