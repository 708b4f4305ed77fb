//! Domain core for turfsync: role-derived hierarchical geographic access
//! control for a campaign field dashboard.
//!
//! This crate is pure — no I/O, no storage, no clocks. It defines:
//!
//! - The reference data model (counties, areas, precincts, groups) and the
//!   indexed [`ReferenceCatalog`] / ordered [`FilteredCatalog`] containers.
//! - The [`Role`] enumeration and its per-role [`AccessPolicy`] table.
//! - Scope types: the trusted [`AuthoritativeScope`] (validated from the
//!   profile resolver's wire payload) and the untrusted [`ClaimsBundle`]
//!   hint attached to auth tokens.
//! - The hierarchy filter ([`filter_catalog`]) that narrows a catalog to a
//!   scope while preserving containment integrity by construction.
//! - Payload redaction for safe logging of malformed resolver responses.
//! - TOML configuration for the sync engine.
//!
//! # Trust Model
//!
//! Authorization is always server-derived. [`AuthoritativeScope`] can only
//! be built by validating a [`RawScopeResponse`] returned by the profile
//! resolver; the token-attached [`ClaimsBundle`] is a re-sync hint and is
//! never consulted when computing what a user may see.

pub mod config;
pub mod filter;
pub mod model;
pub mod redact;
pub mod role;
pub mod scope;

pub use config::{ConfigError, MirrorConfig, ResolverConfig, SyncConfig};
pub use filter::{DropReason, DroppedEntity, FilterOutcome, filter_catalog};
pub use model::{
    Area, AreaId, CatalogError, County, CountyId, FilteredCatalog, Group, GroupId, Precinct,
    PrecinctId, ReferenceCatalog,
};
pub use redact::{redact, redact_for_log};
pub use role::{AccessPolicy, Role};
pub use scope::{
    AuthoritativeScope, ClaimsBundle, RawScopeResponse, ScopeHint, ScopeSet, ScopeValidationError,
    UNRESTRICTED_MARKER,
};
