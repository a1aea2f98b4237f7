use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Wakes the owning context when the inbound queue has data.
///
/// **Contract:**
/// - `signal()` is callable from any thread and never blocks.
/// - Signals raised before the owner wakes are coalesced into one wake-up
///   (at most one stored permit).
/// - The owner is never run inside `signal()`; it resumes from
///   [`wait`](Notifier::wait) when its scheduler polls it.
pub struct Notifier {
    notify: Notify,
    torn_down: AtomicBool,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            notify: Notify::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Returns `false` once the notifier has been torn down.
    pub fn signal(&self) -> bool {
        if self.torn_down.load(Ordering::Acquire) {
            return false;
        }
        self.notify.notify_one();
        true
    }

    /// Resolves after one or more signals, or after teardown.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Releases every waiting owner for the last time, plus the next one to
    /// wait. Later signals are ignored.
    pub fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
            self.notify.notify_one();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
