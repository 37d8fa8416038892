//! Signal handling for graceful shutdown
//!
//! Wires SIGTERM/SIGINT and unrecoverable faults to a bounded-deadline
//! runtime exit. Installation is an explicit call made once by the process
//! entry point — never a construction-time side effect — so tests can build
//! runtimes without mutating global signal state.

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::runtime::Runtime;

/// Install process-wide shutdown hooks for `rt`.
///
/// A termination signal triggers `exit(0)`, an unrecoverable fault (panic)
/// triggers `exit(1)`; both are bounded by the configured shutdown
/// timeout. Call once from the process entry point.
pub fn install_shutdown_hooks(rt: &Runtime) -> JoinHandle<()> {
    let rt = rt.clone();

    // Panics anywhere in the process count as unrecoverable faults; the
    // hook forwards them to the shutdown task, which owns the exit path.
    let (fault_tx, mut fault_rx) = tokio::sync::mpsc::unbounded_channel();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let _ = fault_tx.send(());
    }));

    tokio::spawn(async move {
        let timeout = rt.config().shutdown_timeout();
        tokio::select! {
            _ = wait_for_shutdown_signal() => {
                rt.exit(0, timeout).await;
            }
            _ = fault_rx.recv() => {
                error!("Unrecoverable fault, shutting down");
                rt.exit(1, timeout).await;
            }
        }
    })
}

/// Wait for a termination signal (SIGTERM, SIGINT, or Ctrl+C).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                signal::ctrl_c().await.ok();
                return;
            }
        };

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to register SIGINT handler: {}", e);
                signal::ctrl_c().await.ok();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
            Err(e) => {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        }
    }
}
