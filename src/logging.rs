//! Logging setup.
//!
//! Logs go to **stderr** through a `tracing` subscriber so that a host
//! reading the provider's stdout never sees them. Credentials are never
//! part of any logged field.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `kapacitor_provider=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Show request-level logs for this crate only
//! RUST_LOG=kapacitor_provider=debug ./my-host
//!
//! # Quiet everything except warnings
//! RUST_LOG=warn ./my-host
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber at `info` unless `RUST_LOG`
/// says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
///
/// # Example
///
/// ```ignore
/// use kapacitor_provider::init_logging;
///
/// fn main() {
///     init_logging();
///     tracing::info!("host starting");
/// }
/// ```
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with a custom level used when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Useful in tests, where several cases may race to install a subscriber.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}
