//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT or SIGTERM
//! - Translate the first one into a graceful shutdown
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second signal is left to the default handler

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// Resolve when the process is asked to stop. Returns the signal name.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}

/// Trigger `shutdown` on the first signal.
pub fn spawn_signal_handler(shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                tracing::info!(signal = name, "Shutdown signal received");
                shutdown.trigger();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    })
}
