//! Tracing setup for hosts embedding the engine.
//!
//! Budget violations, property failures and advisor suggestions are reported
//! through [`crate::hooks::TracingHooks`] as structured events; this module
//! only installs the subscriber that renders them.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// Call once from the embedding host before [`crate::engine::Engine::load`];
/// `RUST_LOG=pipeline::engine=debug` then shows per-request dispatch events.
///
/// # Example
/// ```no_run
/// pipeline::logging::init();
/// let config = pipeline::io::config::load_config("engine.toml".as_ref())?;
/// # let _ = config;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
