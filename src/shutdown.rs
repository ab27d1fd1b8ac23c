//! Cooperative cancellation for the poll loops.
//!
//! The trigger side lives in `main` (wired to Ctrl-C); every component that
//! sleeps between polls holds a [`Shutdown`] and races its sleep against it.

use std::time::Duration;

use tokio::sync::watch;

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// The sleep was interrupted by a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_triggered() {
            return Err(Cancelled);
        }
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = triggered(&mut rx) => Err(Cancelled),
        }
    }
}

async fn triggered(rx: &mut watch::Receiver<bool>) {
    // A dropped sender can never trigger.
    if rx.wait_for(|value| *value).await.is_err() {
        std::future::pending::<()>().await;
    }
}
