//! Shutdown (SIGTERM/SIGINT) and reload (SIGHUP) signal handling.

use tokio::sync::watch;

/// Listens for OS signals and dispatches shutdown and reload.
pub struct SignalHandler {
    shutdown_tx: watch::Sender<bool>,
}

impl SignalHandler {
    /// Create a new signal handler and a receiver that becomes `true` on shutdown.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    /// Trigger shutdown without waiting for a signal.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the signal loop until a shutdown signal arrives, calling `reload_fn`
    /// on every SIGHUP (unix only).
    ///
    /// If the signal handlers cannot be installed, shutdown is triggered
    /// immediately so the server does not run unsupervised.
    pub async fn run<F>(self, reload_fn: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Err(e) = Self::wait_for_shutdown(&reload_fn).await {
            tracing::error!("Failed to install signal handlers: {e}");
        }
        self.shutdown();
    }

    #[cfg(unix)]
    async fn wait_for_shutdown<F: Fn()>(reload_fn: &F) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res?;
                    tracing::info!("Received SIGINT, initiating shutdown...");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                    return Ok(());
                }
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration...");
                    reload_fn();
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown<F: Fn()>(_reload_fn: &F) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        Ok(())
    }
}
