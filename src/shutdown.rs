//! Signal handling for cancellable runs.
//!
//! SIGINT (Ctrl+C) and SIGTERM cancel a [`CancellationToken`] that the
//! pipelines poll. A `cancelling` progress event is emitted first so the
//! user sees the request was received while the rollback runs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::progress::{ProgressEvent, ProgressReporter};

/// Spawn the signal listener and return the token it cancels.
pub fn install_signal_handler(progress: Arc<dyn ProgressReporter>) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;

        progress.report(ProgressEvent::Cancelling {
            message: "Cancelling... finishing current step".to_string(),
        });
        token_clone.cancel();
        debug!("signal handler completed");
    });

    token
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (Ctrl+C), cancelling"),
                    _ = sigterm.recv() => info!("received SIGTERM, cancelling"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler; only Ctrl+C will cancel");
                let _ = ctrl_c.await;
                info!("received SIGINT (Ctrl+C), cancelling");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received Ctrl+C, cancelling");
    }
}
