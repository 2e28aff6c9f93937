//! FIFO admission gate: at most one session runs against the backend at a time.
//!
//! Built on `tokio::sync::Mutex`, which wakes waiters in the order they
//! queued. A failing call releases the gate like any other, so later calls
//! still run, and each call's result goes only to its own caller.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Default)]
pub struct CallQueue {
    gate: Arc<Mutex<()>>,
    waiting: Arc<AtomicUsize>,
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for every earlier call to settle, then run `call`.
    pub async fn run<T, F, Fut>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst);
        if ahead > 0 {
            debug!(ahead, "call queued");
        }
        // Decrements even if the caller gives up while queued
        let ticket = Waiting(&self.waiting);
        let _turn = self.gate.lock().await;
        drop(ticket);

        call().await
    }

    /// Calls waiting for their turn (not counting the one running).
    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Whether a call currently holds the gate.
    #[cfg(test)]
    fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
