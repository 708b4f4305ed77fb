//! Scope-change notification.
//!
//! Consuming views subscribe to learn when the mirror was replaced (or a
//! sync failed) and then re-run their own queries against the mirror. The
//! signal is a cache-invalidation ping, not a data carrier: a consumer that
//! misses an event re-queries the mirror rather than replaying history, so
//! a `watch` channel (last event wins) is exactly the right primitive.

use tokio::sync::watch;

use crate::mirror::SyncStatus;

/// What the notifier publishes after every sync pass and sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSignal {
    /// Mirror data generation at publish time. Unchanged when the pass
    /// failed (the mirror was not touched).
    pub generation: u64,
    /// Status after the pass: `Idle` on success, `Error` on failure.
    pub status: SyncStatus,
}

impl SyncSignal {
    const fn initial() -> Self {
        Self {
            generation: 0,
            status: SyncStatus::Idle,
        }
    }
}

/// Publisher half, owned by the sync orchestrator.
#[derive(Debug)]
pub struct ScopeChangeNotifier {
    tx: watch::Sender<SyncSignal>,
}

impl ScopeChangeNotifier {
    /// Creates a notifier with the initial (generation 0, idle) signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncSignal::initial());
        Self { tx }
    }

    /// Publishes a signal, replacing any unconsumed previous one.
    pub fn publish(&self, signal: SyncSignal) {
        // send_replace never fails; a notifier with no listeners is fine.
        self.tx.send_replace(signal);
    }

    /// Registers a new listener. It starts at the latest published signal.
    #[must_use]
    pub fn subscribe(&self) -> ScopeChangeListener {
        ScopeChangeListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ScopeChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber half, held by consuming views.
#[derive(Debug, Clone)]
pub struct ScopeChangeListener {
    rx: watch::Receiver<SyncSignal>,
}

impl ScopeChangeListener {
    /// Waits for the next signal after the last one seen.
    ///
    /// Returns `None` when the notifier (and thus the orchestrator) has
    /// been dropped.
    pub async fn changed(&mut self) -> Option<SyncSignal> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// The most recently published signal, without waiting.
    #[must_use]
    pub fn latest(&mut self) -> SyncSignal {
        *self.rx.borrow_and_update()
    }
}
