//! A single cancellation signal threaded through every suspension point
//! (spec.md §5). One `CancellationSignal` is owned by the supervisor; every
//! component holds a cloned `CancellationToken`. There's no `tokio-util`
//! dependency in this workspace's stack, so this is a thin `watch<bool>`
//! wrapper rather than reaching for `CancellationToken` from a new crate.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationSignal {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    pub fn new() -> (Self, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancellationToken { rx })
    }

    /// Monotone: once cancelled, stays cancelled.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires; resolves immediately if it already
    /// has. Safe to call from a `tokio::select!` arm repeatedly.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}
