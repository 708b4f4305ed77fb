//! Sync orchestrator: drives resolve → filter → replace and owns the sync
//! state machine.
//!
//! # State machine
//!
//! `idle → syncing → { idle (success), error }`, persisted in the mirror's
//! sync metadata. Every failure is recovered here into `Error` state;
//! nothing propagates to callers as a panic, and consuming views keep
//! reading last-known-good data.
//!
//! # Single flight
//!
//! At most one sync pass runs at a time. A trigger arriving mid-pass is
//! coalesced into a single queued follow-up pass (not dropped: a claims
//! change observed mid-flight must eventually be synced against fresh
//! authoritative scope). Two passes never run concurrently against the
//! same mirror, so the mirror has exactly one writer by construction.
//!
//! # Cancellation
//!
//! The session epoch is captured when a pass starts and re-checked
//! immediately before the mirror commit — not merely before starting — so
//! a sign-out or identity switch while the pass is awaiting I/O discards
//! the stale result. `sign_out` additionally waits for any in-flight pass
//! and then clears the mirror, so a departed user's data never survives.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use turfsync_core::filter::filter_catalog;
use turfsync_core::scope::{AuthoritativeScope, ClaimsBundle};

use crate::catalog::CatalogSource;
use crate::error::SyncError;
use crate::mirror::{LocalMirror, SyncStatus};
use crate::notifier::{ScopeChangeListener, ScopeChangeNotifier, SyncSignal};
use crate::resolver::ProfileResolver;
use crate::session::{Identity, SessionHandle};

/// What caused a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A session was established.
    SessionStart,
    /// The active identity changed.
    IdentityChanged,
    /// The authentication collaborator reported new claims (hint only).
    ClaimsChanged,
    /// Explicit caller request (e.g. a retry after an error).
    Manual,
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The pass committed; the mirror is at `generation`.
    Completed {
        /// New mirror data generation.
        generation: u64,
    },
    /// Another pass was in flight; this trigger was folded into the queued
    /// follow-up pass.
    Coalesced,
    /// The pass failed; the mirror holds last-known-good data and the
    /// metadata records the error.
    Failed {
        /// What went wrong.
        error: SyncError,
    },
}

/// Drives the end-to-end sync flow against one mirror.
pub struct SyncOrchestrator {
    session: SessionHandle,
    resolver: Arc<dyn ProfileResolver>,
    catalog: Arc<dyn CatalogSource>,
    mirror: Arc<LocalMirror>,
    notifier: ScopeChangeNotifier,
    resolver_timeout: Duration,
    /// Single-flight slot: held for the duration of a pass (and its queued
    /// follow-ups).
    sync_slot: AsyncMutex<()>,
    /// Trigger that arrived while a pass was in flight, if any.
    queued: Mutex<Option<SyncTrigger>>,
    /// Fingerprint of the last claims bundle observed.
    last_claims: Mutex<Option<String>>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator.
    ///
    /// `resolver_timeout` bounds each profile-resolver call; expiry is a
    /// transport failure, never an indefinitely `syncing` mirror.
    #[must_use]
    pub fn new(
        session: SessionHandle,
        resolver: Arc<dyn ProfileResolver>,
        catalog: Arc<dyn CatalogSource>,
        mirror: Arc<LocalMirror>,
        resolver_timeout: Duration,
    ) -> Self {
        Self {
            session,
            resolver,
            catalog,
            mirror,
            notifier: ScopeChangeNotifier::new(),
            resolver_timeout,
            sync_slot: AsyncMutex::new(()),
            queued: Mutex::new(None),
            last_claims: Mutex::new(None),
        }
    }

    /// Registers a listener for mirror-replaced / sync-failed signals.
    #[must_use]
    pub fn subscribe(&self) -> ScopeChangeListener {
        self.notifier.subscribe()
    }

    /// The mirror this orchestrator writes to.
    #[must_use]
    pub fn mirror(&self) -> &Arc<LocalMirror> {
        &self.mirror
    }

    /// Runs (or coalesces) one sync pass.
    ///
    /// Returns [`SyncOutcome::Coalesced`] when another pass is in flight;
    /// the in-flight holder will run exactly one follow-up pass for all
    /// triggers coalesced while it ran.
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        let Ok(guard) = self.sync_slot.try_lock() else {
            *self.queue_slot() = Some(trigger);
            debug!(?trigger, "sync in flight, trigger coalesced");
            return SyncOutcome::Coalesced;
        };

        let outcome = self.run_pass(trigger).await;

        // Drain triggers that coalesced while we ran. The queue lock must
        // be released before the pass runs: holding the std guard across
        // the await would make this future !Send and block concurrent
        // enqueuers for the whole pass.
        loop {
            let queued = self.queue_slot().take();
            let Some(queued) = queued else { break };
            let followup = self.run_pass(queued).await;
            debug!(?queued, outcome = ?followup, "queued sync pass finished");
        }
        drop(guard);

        // A trigger may have slipped in between the final drain check and
        // the slot release; pick it up rather than losing it.
        let stragglers = self.queue_slot().take();
        if let Some(straggler) = stragglers {
            let followup = Box::pin(self.sync(straggler)).await;
            debug!(?straggler, outcome = ?followup, "straggler sync pass finished");
        }

        outcome
    }

    /// Reacts to a claims-changed signal from the authentication
    /// collaborator.
    ///
    /// The bundle is an untrusted hint: it only decides *whether* to
    /// re-sync (by fingerprint comparison), never what the scope is.
    /// Returns `None` when the hint is unchanged and no sync was run.
    pub async fn on_claims_changed(&self, claims: &ClaimsBundle) -> Option<SyncOutcome> {
        let fingerprint = claims.hint_fingerprint();
        {
            let mut last = self
                .last_claims
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(fingerprint.as_str()) {
                debug!("claims hint unchanged, no re-sync");
                return None;
            }
            *last = Some(fingerprint);
        }
        info!("claims hint changed, triggering re-sync");
        Some(self.sync(SyncTrigger::ClaimsChanged).await)
    }

    /// Signs the session out and destroys the mirror contents.
    ///
    /// Waits for any in-flight pass to settle (its result is discarded via
    /// the epoch check or wiped here), then clears the mirror in one
    /// transaction and publishes a signal.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the clear transaction fails.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        self.session.sign_out();
        // Taking the slot serializes against any in-flight pass, so the
        // clear below always runs after a racing commit.
        let _guard = self.sync_slot.lock().await;
        let generation = self.mirror.clear()?;
        self.notifier.publish(SyncSignal {
            generation,
            status: SyncStatus::Idle,
        });
        Ok(())
    }

    fn queue_slot(&self) -> std::sync::MutexGuard<'_, Option<SyncTrigger>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_pass(&self, trigger: SyncTrigger) -> SyncOutcome {
        info!(?trigger, "sync pass starting");

        let identity = match self.session.identity_snapshot() {
            Some(identity) if !identity.is_expired() => identity,
            _ => return self.fail_pass(SyncError::Unauthenticated),
        };
        let epoch = self.session.current_epoch();

        if let Err(err) = self.mirror.mark_syncing() {
            return self.fail_pass(err);
        }

        match self.run_steps(&identity, epoch).await {
            Ok(generation) => {
                info!(generation, "sync pass committed");
                self.notifier.publish(SyncSignal {
                    generation,
                    status: SyncStatus::Idle,
                });
                SyncOutcome::Completed { generation }
            }
            Err(SyncError::Cancelled) => {
                // The identity departed mid-pass: discard the result and
                // reset the status so the mirror never sits in `syncing`
                // indefinitely. Entity tables are untouched; sign-out's
                // clear or the next identity's sync takes it from here.
                debug!("sync pass cancelled, result discarded");
                if let Err(err) = self.mirror.mark_idle() {
                    error!(error = %err, "failed to reset sync status after cancellation");
                }
                SyncOutcome::Failed {
                    error: SyncError::Cancelled,
                }
            }
            Err(err) => self.fail_pass(err),
        }
    }

    async fn run_steps(&self, identity: &Identity, epoch: u64) -> Result<u64, SyncError> {
        let raw = match tokio::time::timeout(self.resolver_timeout, self.resolver.resolve(identity))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SyncError::Transport {
                    detail: format!(
                        "resolver timed out after {}s",
                        self.resolver_timeout.as_secs()
                    ),
                });
            }
        };

        let scope = AuthoritativeScope::from_raw(&raw)?;
        let catalog = self.catalog.fetch().await?;
        let outcome = filter_catalog(&catalog, &scope);
        if !outcome.dropped.is_empty() {
            warn!(
                dropped = outcome.dropped.len(),
                role = %scope.role,
                "resolver scope referenced entities the filter dropped"
            );
        }

        // Re-check the epoch after the awaits, immediately before the
        // commit: a stale pass must never write a departed identity's data.
        if self.session.current_epoch() != epoch {
            return Err(SyncError::Cancelled);
        }

        let mut tx = self.mirror.begin_replace();
        tx.stage_catalog(&outcome.catalog);
        tx.commit()
    }

    fn fail_pass(&self, err: SyncError) -> SyncOutcome {
        warn!(error = %err, "sync pass failed");
        if let Err(mark_err) = self.mirror.mark_error(&err.to_string()) {
            error!(error = %mark_err, "failed to record sync error in mirror metadata");
        }
        let generation = self.mirror.generation().unwrap_or(0);
        self.notifier.publish(SyncSignal {
            generation,
            status: SyncStatus::Error,
        });
        SyncOutcome::Failed { error: err }
    }
}
