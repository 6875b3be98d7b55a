//! Shutdown signals.
//!
//! The engine stops its drivers on `SIGTERM` or `SIGINT` (Ctrl+C elsewhere).

use std::time::Duration;

use tracing::{error, info};

/// How long [`Engine::stop`](crate::engine::Engine::stop) waits for each
/// driver before aborting it.
pub const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Sigterm,
    Sigint,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
        }
    }
}

/// Wait until the process is asked to stop.
///
/// # Errors
///
/// Returns the I/O error if a signal handler cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).inspect_err(|e| {
            error!(error = %e, "Failed to install SIGTERM handler");
        })?;
        let mut sigint = signal(SignalKind::interrupt()).inspect_err(|e| {
            error!(error = %e, "Failed to install SIGINT handler");
        })?;

        let received = tokio::select! {
            _ = sigterm.recv() => ShutdownSignal::Sigterm,
            _ = sigint.recv() => ShutdownSignal::Sigint,
        };
        info!(signal = %received, "Shutdown signal received");
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.inspect_err(|e| {
            error!(error = %e, "Failed to listen for Ctrl+C");
        })?;
        info!(signal = %ShutdownSignal::Sigint, "Shutdown signal received");
        Ok(ShutdownSignal::Sigint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Sigterm.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Sigint.to_string(), "SIGINT");
    }
}
