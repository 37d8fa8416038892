//! Logging initialization
//!
//! Respects the RUST_LOG environment variable; a config-provided filter is
//! used only when RUST_LOG is unset, defaulting to "info".

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for the runtime process.
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g. "info",
///   "module_runtime=debug"). RUST_LOG takes precedence when set.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter.unwrap_or("info"))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()), // Respect NO_COLOR standard
        )
        .with(env_filter)
        .init();
}
