//! Sync engine for turfsync: fetches a user's authoritative geographic
//! scope from the profile resolver, filters the reference catalog, and
//! maintains the SQLite-backed local mirror that consuming views read.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐   resolve    ┌──────────────────┐
//! │ SessionHandle │───────────▶│  ProfileResolver  │  (trust boundary)
//! └──────────────┘             └────────┬──────────┘
//!                                        │ RawScopeResponse
//!                              validate  ▼
//!                              AuthoritativeScope
//!                                        │
//!            ┌───────────────┐  filter   ▼
//!            │ CatalogSource │────▶ filter_catalog ──▶ FilteredCatalog
//!            └───────────────┘                              │
//!                                            atomic replace ▼
//!                                               ┌──────────────┐
//!  views ◀── ScopeChangeNotifier ◀── commit ──│  LocalMirror  │
//!                                               └──────────────┘
//! ```
//!
//! The [`SyncOrchestrator`] serializes passes (single-flight), bounds the
//! resolver call with a timeout, and discards results whose identity
//! departed mid-flight. Consuming code reads exclusively from
//! [`LocalMirror`] — never from the raw catalog, which bypasses
//! authorization.

pub mod catalog;
pub mod error;
pub mod mirror;
pub mod notifier;
pub mod orchestrator;
pub mod resolver;
pub mod session;

pub use catalog::{CatalogSource, StaticCatalogSource};
pub use error::SyncError;
pub use mirror::{LocalMirror, MirrorSnapshot, ReplaceTransaction, SyncMetadata, SyncStatus};
pub use notifier::{ScopeChangeListener, ScopeChangeNotifier, SyncSignal};
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncTrigger};
pub use resolver::{HttpProfileResolver, ProfileResolver};
pub use session::{Identity, SessionHandle};
