use std::io;

use tokio::signal;
use tracing::info;

/// Resolve on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
