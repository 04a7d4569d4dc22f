//! Wakeup primitives shared by the engine and its background tasks.
//!
//! [`EventNotifier`] is the externally observable change signal: the engine
//! raises it on every state or membership change, and the caller clears it
//! after reading the state it cares about. It is edge-raised and
//! level-read; the engine never clears it itself, so a poll-style caller
//! can always catch up after a burst of changes.
//!
//! [`CancelFlag`] is the internal teardown signal: once cancelled, every
//! in-flight operation and background task observes it at its next await
//! point and bails out.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-shot-per-change signal. Raised by the engine, cleared by the
/// external caller after observation.
#[derive(Debug, Default)]
pub struct EventNotifier {
    signaled: AtomicBool,
    notify: Notify,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes all current waiters.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// True while the signal is raised.
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Resets the signal. The caller does this after observing a change;
    /// a change raised between observation and clear is lost, which is
    /// acceptable because the caller is about to query fresh state anyway.
    pub fn clear(&self) {
        self.signaled.store(false, Ordering::SeqCst);
    }

    /// Waits until the signal is raised. Returns immediately when it
    /// already is. Multiple concurrent waiters all observe the same raise.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a signal racing
            // with this call cannot be missed.
            let notified = self.notify.notified();
            if self.is_signaled() {
                return;
            }
            notified.await;
        }
    }
}

/// Cooperative cancellation flag for teardown.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arms the flag after a completed teardown so the engine can be
    /// used again.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Completes when the flag is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
