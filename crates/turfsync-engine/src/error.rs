//! Error taxonomy for the sync engine.
//!
//! Every failure a sync pass can hit collapses into one [`SyncError`]
//! variant. Nothing here propagates past the orchestrator boundary as a
//! panic: the orchestrator records the error in the mirror's sync metadata
//! and the UI contract stays "read the mirror, optionally show a staleness
//! indicator".

use thiserror::Error;
use turfsync_core::scope::ScopeValidationError;

/// Errors surfaced by the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    /// No valid identity: the session is signed out or the token expired.
    /// A sync never starts in this state; the caller should route to a
    /// sign-in flow.
    #[error("unauthenticated: no valid identity")]
    Unauthenticated,

    /// The profile resolver returned an unparseable or shape-invalid
    /// payload. The raw payload is logged redacted at the call site; the
    /// mirror is left untouched.
    #[error("malformed resolver response: {detail}")]
    MalformedResponse {
        /// What failed validation.
        detail: String,
    },

    /// Network failure or timeout talking to the profile resolver.
    /// Recoverable by a caller-driven retry.
    #[error("transport error: {detail}")]
    Transport {
        /// Transport-level description.
        detail: String,
    },

    /// The mirror transaction failed to commit. The prior mirror state
    /// remains authoritative.
    #[error("storage error: {detail}")]
    Storage {
        /// Storage-level description.
        detail: String,
    },

    /// The identity changed or signed out while this sync was in flight;
    /// its result was discarded rather than committed.
    #[error("sync cancelled: identity changed while in flight")]
    Cancelled,
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage {
            detail: err.to_string(),
        }
    }
}

impl From<ScopeValidationError> for SyncError {
    fn from(err: ScopeValidationError) -> Self {
        Self::MalformedResponse {
            detail: err.to_string(),
        }
    }
}
