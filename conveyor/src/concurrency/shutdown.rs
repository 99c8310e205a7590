use tokio::sync::watch;

/// Transmitter side of the stop signal.
///
/// Requesting a stop is idempotent and never blocks, so it can be called from a signal
/// handler, a presentation layer thread or a test.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests every subscribed role to stop at its next poll point.
    pub fn shutdown(&self) {
        // `send_replace` succeeds even when no receiver is subscribed yet.
        self.0.send_replace(true);
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates a new receiver observing this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the stop signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once a stop has been requested. Never blocks.
    pub fn is_shutdown_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop has been requested.
    ///
    /// If the transmitter is dropped without requesting a stop, the future stays pending: a
    /// vanished controller is not a stop request.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a new stop signal in the "running" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
