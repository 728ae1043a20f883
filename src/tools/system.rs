//! Process lifecycle helpers.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Spawns a listener which cancels the returned token on SIGINT, SIGTERM or SIGHUP.
pub fn install_termination_listener() -> CancellationToken {
    let token = CancellationToken::new();

    tokio::spawn({
        let token = token.clone();
        async move {
            let mut sig_term = signal(SignalKind::terminate()).ok();
            let mut sig_int = signal(SignalKind::interrupt()).ok();
            let mut sig_hup = signal(SignalKind::hangup()).ok();

            tokio::select! {
                Some(_) = async { sig_int.as_mut()?.recv().await } => {
                    tracing::info!("Received SIGINT. Shutting down...");
                },
                Some(_) = async { sig_term.as_mut()?.recv().await } => {
                    tracing::info!("Received SIGTERM. Shutting down...");
                },
                Some(_) = async { sig_hup.as_mut()?.recv().await } => {
                    tracing::info!("Received SIGHUP. Shutting down...");
                },
                _ = token.cancelled() => {},
            }

            token.cancel();
        }
    });

    token
}
