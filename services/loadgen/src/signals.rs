//! SIGINT/SIGTERM handling. The engine runs on plain threads, so signals are
//! awaited on a small current-thread runtime of their own.

use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use loadgen_core::{CancellationToken, StopReason};

/// Exit code when a second signal forces the process down.
const FORCED_EXIT_CODE: i32 = 130;

/// The first signal cancels `token`; a second one exits immediately.
pub fn spawn_listener(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let signal = wait_for_signal().await;
                info!(signal, "Received shutdown signal; stopping workers");
                token.cancel(StopReason::Cancelled);

                let signal = wait_for_signal().await;
                warn!(signal, "Second signal received; exiting without cleanup");
                std::process::exit(FORCED_EXIT_CODE);
            });
        })
        .context("failed to spawn signal listener")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
