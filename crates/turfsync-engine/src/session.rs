//! Identity and session tracking.
//!
//! The "current user" is explicit state carried by a [`SessionHandle`], not
//! a module-level global, so the engine is testable without a UI runtime.
//!
//! # Epochs
//!
//! Every sign-in and sign-out bumps a monotonically increasing epoch
//! counter. The orchestrator captures the epoch when a sync starts and
//! re-checks it immediately before committing to the mirror: if the epoch
//! moved, the in-flight result belongs to a departed identity and is
//! discarded. This is the cancellation mechanism for sign-out-mid-sync.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::info;

/// An authenticated identity, as issued by the authentication collaborator.
///
/// The bearer token is held in a [`SecretString`] so it never appears in
/// `Debug` output or logs. Immutable once established for a session.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Opaque subject reference.
    pub subject: String,
    /// Bearer credential attached to resolver calls.
    pub token: SecretString,
    /// Token expiry, if the issuer provided one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Creates an identity with no expiry.
    #[must_use]
    pub fn new(subject: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            token: SecretString::from(token.into()),
            expires_at: None,
        }
    }

    /// Sets the token expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true when the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Cheap-to-clone handle to the session's identity state.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

#[derive(Debug, Default)]
struct SessionInner {
    identity: RwLock<Option<Identity>>,
    epoch: AtomicU64,
}

impl SessionHandle {
    /// Creates a signed-out session at epoch zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Establishes `identity` as the session identity.
    ///
    /// Returns the new epoch. Any sync in flight for the previous identity
    /// will observe the epoch change and discard its result.
    pub fn sign_in(&self, identity: Identity) -> u64 {
        let mut slot = self
            .inner
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        info!(subject = %identity.subject, "session sign-in");
        *slot = Some(identity);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Destroys the session identity.
    ///
    /// Returns the new epoch.
    pub fn sign_out(&self) -> u64 {
        let mut slot = self
            .inner
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = slot.take() {
            info!(subject = %identity.subject, "session sign-out");
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current epoch; bumped by every sign-in and sign-out.
    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Clones the current identity, if any.
    #[must_use]
    pub fn identity_snapshot(&self) -> Option<Identity> {
        self.inner
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
