//! Session-wide stop signal, a `watch` flag raised once on shutdown.

use tokio::sync::watch;

/// Owner side. Dropping it also releases every waiting [`StopSignal`].
#[derive(Debug)]
pub(crate) struct StopHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, cloned into the driver task and the dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub(crate) fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopHandle {
    pub(crate) fn stop(&self) {
        self.tx.send_replace(true);
    }
}

impl StopSignal {
    /// Resolves once the session is stopping.
    pub(crate) async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
