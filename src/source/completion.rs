//! Exactly-once completion for fetches raced against a timeout.
//!
//! The network future and a fallback timer run as two tasks. Each must win
//! the [`CompletionGuard`] before invoking the callback, so the caller hears
//! back exactly once and a response arriving after the timeout is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::FetchError;

/// Bounded wait for a single upstream request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared "already completed" flag.
#[derive(Debug, Clone, Default)]
pub struct CompletionGuard(Arc<AtomicBool>);

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim completion. Returns `true` for the first caller only.
    pub fn try_complete(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle on an outstanding raced fetch.
#[derive(Debug)]
pub struct FetchTicket {
    guard: CompletionGuard,
    network: JoinHandle<()>,
    timer: JoinHandle<()>,
}

impl FetchTicket {
    pub fn is_completed(&self) -> bool {
        self.guard.is_completed()
    }

    /// Invalidate the fetch: neither path may report after this returns.
    pub fn cancel(self) {
        self.guard.try_complete();
        self.network.abort();
        self.timer.abort();
    }
}

/// Run `operation` against a `timeout` fallback and hand whichever finishes
/// first to `on_complete`. Must be called from within a tokio runtime.
pub fn race_with_timeout<T, F, C>(operation: F, timeout: Duration, on_complete: C) -> FetchTicket
where
    T: Send + 'static,
    F: Future<Output = Result<T, FetchError>> + Send + 'static,
    C: Fn(Result<T, FetchError>) + Send + Sync + 'static,
{
    let guard = CompletionGuard::new();
    let on_complete = Arc::new(on_complete);

    let timer = {
        let guard = guard.clone();
        let on_complete = Arc::clone(&on_complete);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if guard.try_complete() {
                debug!("Fetch timed out after {:?}", timeout);
                on_complete(Err(FetchError::Timeout));
            }
        })
    };

    let network = {
        let guard = guard.clone();
        let timer = timer.abort_handle();
        tokio::spawn(async move {
            let result = operation.await;
            if guard.try_complete() {
                timer.abort();
                on_complete(result);
            } else {
                debug!("Discarding late fetch response");
            }
        })
    };

    FetchTicket {
        guard,
        network,
        timer,
    }
}
