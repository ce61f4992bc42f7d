//! Single-fire failure signal shared by the two relay tasks

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Marks the first fatal condition on a connection
///
/// Either relay task may fire it; only the first call wins. Firing never
/// blocks, and a fire that happens before anyone waits is not lost.
#[derive(Debug, Default)]
pub struct FailureLatch {
    fired: AtomicBool,
    notify: Notify,
}

impl FailureLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch; returns `true` only for the call that fired it
    pub fn fire(&self) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.notify.notify_one();
        }
        first
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the latch has fired
    pub async fn wait(&self) {
        while !self.is_fired() {
            self.notify.notified().await;
        }
    }
}
