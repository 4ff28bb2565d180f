//! A minimal cancellation primitive threaded from a client session down into
//! command dispatch and streaming-argument reads.
//!
//! The original threads a `context.Context` through `Command`/`CommandStream`
//! for this purpose; pulling in `tokio-util` for a full `CancellationToken`
//! isn't warranted when nothing else in the crate needs it, so this is a
//! small `Arc<AtomicBool>` + `Notify` pair instead (see DESIGN.md).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cheaply-cloneable flag that can be observed or awaited for cancellation.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called (immediately, if it already
    /// has been).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.notify.notified().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
