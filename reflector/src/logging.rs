//! Diagnostic tracing for the reflector.
//!
//! - **Tracing (this module)**: events via `RUST_LOG`, output to stderr.
//! - **Stage logs (`stages`)**: stdout/stderr of every agent and publish
//!   run under the configured log directory. Always written, unaffected by
//!   `RUST_LOG`.
//! - **Status lines (`report`)**: one report per iteration on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `reflector=info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=reflector=debug reflector --one-shot
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reflector=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
