//! Process termination signals.

use std::fmt;

use futures::future;
use tracing::{error, info};

/// The signal that asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM, as sent by container runtimes and service managers.
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        })
    }
}

/// Wait for the first termination signal.
///
/// A signal whose listener cannot be installed is logged and never fires;
/// the other one still works.
pub async fn wait_for_signal() -> ShutdownSignal {
    tokio::select! {
        () = interrupt() => ShutdownSignal::Interrupt,
        () = terminate() => ShutdownSignal::Terminate,
    }
}

/// Future for `axum::serve(..).with_graceful_shutdown()`.
///
/// Once it resolves the listener stops accepting; open SSE relays run to
/// completion.
pub async fn shutdown_signal() {
    let signal = wait_for_signal().await;
    info!(%signal, "Shutting down, draining in-flight requests");
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, signal = %ShutdownSignal::Interrupt, "Cannot listen for signal");
        future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, signal = %ShutdownSignal::Terminate, "Cannot listen for signal");
            future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    future::pending::<()>().await;
}
