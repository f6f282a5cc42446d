// Signal handling module
//
// Supported signals:
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use std::sync::Arc;
use tokio::sync::Notify;

use crate::logger;

/// Start the signal listener (Unix)
///
/// Either signal stops the accept loop through `shutdown`; in-flight pulls
/// are left to finish.
#[cfg(unix)]
pub fn start_signal_handler(shutdown: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    logger::log_error(&format!("Failed to register signal handlers: {e}"));
                    return;
                }
            };

        logger::log_info(&format!(
            "Signal handlers registered (SIGTERM, SIGINT), pid {}",
            std::process::id()
        ));

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };

        logger::log_info(&format!("{name} received, initiating graceful shutdown"));
        // Stores a permit if the accept loop is between polls
        shutdown.notify_one();
    });
}

/// Fallback: only Ctrl+C
#[cfg(not(unix))]
pub fn start_signal_handler(shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                logger::log_info("Ctrl+C received, initiating graceful shutdown");
                shutdown.notify_one();
            }
            Err(e) => logger::log_error(&format!("Failed to listen for Ctrl+C: {e}")),
        }
    });
}
