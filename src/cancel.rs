//! Cancellation signals and the timeout/cancel race used at every await point.
//!
//! Acquisition and detector initialization both need "run this work, but give
//! up after a deadline or when the caller cancels". [`guarded`] is that race in
//! one place, so call sites only decide what an interruption means for them.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Why guarded work did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Owning side of a cancellation pair. Dropping it does not cancel.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// Observing side of a cancellation pair; cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl Canceller {
    /// Create a new canceller and its first signal.
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    /// Another signal observing this canceller.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the value readable without a live sender; `cancelled()` treats a
        // closed channel as "never".
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the
    /// canceller is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// `Err(Cancelled)` if already cancelled.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Race `work` against an optional timeout and an optional cancel signal.
///
/// Cancellation wins ties so an already-cancelled caller never observes a
/// late success.
pub async fn guarded<F, T>(
    work: F,
    timeout: Option<Duration>,
    cancel: Option<&CancelSignal>,
) -> Result<T, Interrupted>
where
    F: Future<Output = T>,
{
    if let Some(signal) = cancel {
        signal.check()?;
    }

    let cancelled = async {
        match cancel {
            Some(signal) => signal.cancelled().await,
            None => std::future::pending().await,
        }
    };

    let timed = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Interrupted::TimedOut(limit)),
            None => Ok(work.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(Interrupted::Cancelled),
        result = timed => result,
    }
}

/// Sleep that returns early with `Cancelled`.
pub async fn sleep(duration: Duration, cancel: Option<&CancelSignal>) -> Result<(), Interrupted> {
    guarded(tokio::time::sleep(duration), None, cancel).await
}

/// Poll `condition` every `interval` until it holds or `limit` elapses.
///
/// Returns `true` when the condition was met.
pub async fn poll_until<C>(mut condition: C, limit: Duration, interval: Duration) -> bool
where
    C: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
