/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM cancel the shared shutdown token, which ends
/// the watchdog loop promptly — the poll sleep races against the token, so
/// the daemon does not wait out a full interval before exiting.
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Install SIGINT/SIGTERM handlers that cancel `cancel` on first delivery.
///
/// Must be called from within the tokio runtime.
pub fn install(cancel: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
            }
        }
        cancel.cancel();
    });

    Ok(())
}
