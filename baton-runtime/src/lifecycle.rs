use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Running,
}

/// Owner side of one run's stop flag.
///
/// A fresh flag is created per `start()`, so loops left over from an earlier
/// run keep seeing their own, already raised, flag.
pub(crate) struct StopTrigger {
    tx: watch::Sender<bool>,
}

impl StopTrigger {
    pub(crate) fn new() -> (Self, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, StopSignal { rx })
    }

    pub(crate) fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Loop side of the stop flag, checked at every wake-up.
#[derive(Clone)]
pub(crate) struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop has been requested.
    pub(crate) async fn stopped(&mut self) {
        // An error means the trigger was dropped with its scheduler.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep until `deadline`. Returns `false` if stop was requested first.
    pub(crate) async fn sleep_until(&mut self, deadline: Instant) -> bool {
        if self.is_stopped() {
            return false;
        }
        let woke = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = self.stopped() => false,
        };
        woke && !self.is_stopped()
    }

    pub(crate) async fn sleep(&mut self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration).await
    }
}
