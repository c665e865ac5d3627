use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative cancellation shared by every pipeline stage.
///
/// The token transitions once, Running -> ShuttingDown, when an interrupt is
/// delivered (or [`ShutdownToken::trigger`] is called, e.g. from tests). It is
/// never reset; each run constructs a fresh token. Stages observe it at loop
/// heads and suspension points and decline to start new work; operations
/// already in flight run to completion.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    inner: CancellationToken,
}

impl ShutdownToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    pub fn trigger(&self) {
        self.inner.cancel();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Future that resolves once shutdown has been requested; for use in
    /// `select!` around queue waits and permit acquisition.
    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }

    /// Spawn a task that trips the token on SIGINT or SIGTERM. Nothing is
    /// killed; in-flight copy and upload operations finish on their own.
    pub fn listen_for_signals(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            let mut terminate =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(terminate) => terminate,
                    Err(error) => {
                        tracing::error!("failed installing SIGTERM handler: {error}");
                        return;
                    }
                };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(error) = result {
                        tracing::error!("failed waiting for SIGINT: {error}");
                        return;
                    }
                }
                _ = terminate.recv() => {}
            }
            eprintln!("\nInterrupted, letting in-flight work finish...");
            token.trigger();
        });
    }
}
