//! Shared utilities: logging and signal wiring.

pub mod logging;
pub mod signal;

pub use logging::init_logging;
pub use signal::{install_shutdown_hooks, wait_for_shutdown_signal};
