//! Controller entrypoint: initialize the runtime, start the sweepers, run
//! the watch loop, and propagate shutdown to in-flight child processes.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use cdkstack_controller::runtime::{initialize, run_watch_loop, spawn_sweepers};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    let shutdown_tx = Arc::new(init.shutdown_tx);

    // SIGTERM/ctrl-c flips the shutdown channel; in-flight subprocesses
    // get SIGTERM then SIGKILL, workspaces are removed, and status is left
    // as-is for phase-resume on the next start.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received, shutting down");
        let _ = signal_tx.send(true);
    });

    let sweepers = spawn_sweepers(init.reconciler.clone());

    run_watch_loop(init.stacks, init.reconciler).await?;

    // The watch loop may also stop on its own; make sure the sweepers see
    // shutdown either way before joining them.
    let _ = shutdown_tx.send(true);
    for handle in sweepers {
        let _ = handle.await;
    }

    info!("Controller stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
