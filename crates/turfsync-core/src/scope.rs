//! Scope types and the trust boundary around them.
//!
//! Two scope-shaped things exist in this system and they must never be
//! confused:
//!
//! - [`AuthoritativeScope`] — returned fresh by the profile resolver on
//!   every sync, validated here, and the *only* input to the hierarchy
//!   filter. Constructing one outside [`AuthoritativeScope::from_raw`] is
//!   possible only in tests and in the filter's own unit tests.
//! - [`ClaimsBundle`] — the role/scope hint cached inside the auth token at
//!   issue time. It may be stale or tampered with; it is compared for
//!   change detection (to decide *when* to re-sync) and nothing else.
//!
//! # Validation
//!
//! The resolver payload is validated fail-closed: unknown roles, blank or
//! oversized identifiers, oversized ID lists, and a dimension mixing the
//! unrestricted marker with concrete IDs are all [`ScopeValidationError`]s
//! (surfaced as `MalformedResponse`), never coerced.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::Role;

/// The literal marker a scope dimension carries instead of a concrete ID
/// list to grant unrestricted access on that dimension.
pub const UNRESTRICTED_MARKER: &str = "ALL";

/// Maximum number of identifiers accepted per scope dimension.
///
/// Bounds memory consumed while validating an untrusted payload.
pub const MAX_IDS_PER_DIMENSION: usize = 4096;

/// Maximum accepted length of a single identifier.
pub const MAX_ID_LENGTH: usize = 128;

/// Errors raised while validating a raw resolver payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScopeValidationError {
    /// The role string is not one of the recognized roles.
    #[error("unknown role: {role:?}")]
    UnknownRole {
        /// The unrecognized role string.
        role: String,
    },

    /// An identifier was empty or whitespace-only.
    #[error("blank identifier in {dimension} dimension")]
    BlankId {
        /// Dimension name ("counties", "areas", "precincts").
        dimension: &'static str,
    },

    /// An identifier exceeded [`MAX_ID_LENGTH`].
    #[error("identifier in {dimension} dimension exceeds {MAX_ID_LENGTH} bytes")]
    OversizedId {
        /// Dimension name.
        dimension: &'static str,
    },

    /// A dimension carried more than [`MAX_IDS_PER_DIMENSION`] entries.
    #[error("{dimension} dimension exceeds {MAX_IDS_PER_DIMENSION} entries")]
    OversizedDimension {
        /// Dimension name.
        dimension: &'static str,
    },

    /// A dimension mixed the unrestricted marker with concrete IDs.
    ///
    /// The wire contract is "marker *instead of* an ID list"; a mixed
    /// dimension is ambiguous and is rejected rather than widened.
    #[error("{dimension} dimension mixes the unrestricted marker with concrete ids")]
    MixedUnrestricted {
        /// Dimension name.
        dimension: &'static str,
    },
}

/// One dimension of a scope: either unrestricted or an explicit ID set.
///
/// An empty ID set means "no access on this dimension" — the unrestricted
/// sentinel is always the explicit marker, never an absent or empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSet {
    /// The dimension carried the unrestricted marker.
    Unrestricted,
    /// Explicitly granted identifiers (possibly empty).
    Ids(BTreeSet<String>),
}

impl ScopeSet {
    /// Returns an empty (no-access) scope set.
    #[must_use]
    pub fn empty() -> Self {
        Self::Ids(BTreeSet::new())
    }

    /// Builds an explicit scope set from raw ID strings.
    #[must_use]
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Returns true when the dimension is unrestricted.
    #[must_use]
    pub const fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Returns true when the given ID is explicitly granted.
    ///
    /// An unrestricted dimension contains every ID.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Ids(ids) => ids.contains(id),
        }
    }

    fn validate_raw(
        dimension: &'static str,
        raw: &[String],
    ) -> Result<Self, ScopeValidationError> {
        if raw.len() > MAX_IDS_PER_DIMENSION {
            return Err(ScopeValidationError::OversizedDimension { dimension });
        }
        let has_marker = raw.iter().any(|id| id == UNRESTRICTED_MARKER);
        if has_marker {
            if raw.len() > 1 {
                return Err(ScopeValidationError::MixedUnrestricted { dimension });
            }
            return Ok(Self::Unrestricted);
        }
        let mut ids = BTreeSet::new();
        for id in raw {
            if id.trim().is_empty() {
                return Err(ScopeValidationError::BlankId { dimension });
            }
            if id.len() > MAX_ID_LENGTH {
                return Err(ScopeValidationError::OversizedId { dimension });
            }
            ids.insert(id.clone());
        }
        Ok(Self::Ids(ids))
    }
}

/// Wire shape of the profile resolver's response.
///
/// `{ "role": "...", "access": { "counties": [...], "areas": [...],
/// "precincts": [...] } }` — every field required; serde rejects missing
/// or mistyped fields before semantic validation runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawScopeResponse {
    /// Role string; must match a recognized role exactly.
    pub role: String,
    /// Permitted-ID lists per dimension.
    pub access: RawAccess,
}

/// The `access` object of the resolver response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawAccess {
    /// Permitted county IDs, or the unrestricted marker.
    pub counties: Vec<String>,
    /// Permitted area IDs, or the unrestricted marker.
    pub areas: Vec<String>,
    /// Permitted precinct IDs, or the unrestricted marker.
    pub precincts: Vec<String>,
}

/// The only trusted scope: validated output of the profile resolver.
///
/// Created at sync start, applied atomically to the mirror, never partially
/// applied, and discarded when the sync pass ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoritativeScope {
    /// The user's effective role.
    pub role: Role,
    /// Permitted counties.
    pub counties: ScopeSet,
    /// Permitted areas.
    pub areas: ScopeSet,
    /// Permitted precincts.
    pub precincts: ScopeSet,
}

impl AuthoritativeScope {
    /// Validates a raw resolver payload into a trusted scope.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeValidationError`] (surfaced by the engine as
    /// `MalformedResponse`) if the role is unknown or any dimension is
    /// malformed. Validation never widens: a failure aborts the sync and
    /// leaves the previous mirror authoritative.
    pub fn from_raw(raw: &RawScopeResponse) -> Result<Self, ScopeValidationError> {
        let role =
            Role::from_wire(&raw.role).ok_or_else(|| ScopeValidationError::UnknownRole {
                role: raw.role.clone(),
            })?;
        Ok(Self {
            role,
            counties: ScopeSet::validate_raw("counties", &raw.access.counties)?,
            areas: ScopeSet::validate_raw("areas", &raw.access.areas)?,
            precincts: ScopeSet::validate_raw("precincts", &raw.access.precincts)?,
        })
    }
}

/// Geographic hint carried inside a [`ClaimsBundle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHint {
    /// Hinted county IDs (possibly stale).
    #[serde(default)]
    pub counties: Vec<String>,
    /// Hinted area IDs (possibly stale).
    #[serde(default)]
    pub areas: Vec<String>,
    /// Hinted precinct IDs (possibly stale).
    #[serde(default)]
    pub precincts: Vec<String>,
}

/// Token-attached claims: role plus a geographic scope hint.
///
/// Cached at token-issue time by the authentication collaborator, so it can
/// lag the canonical profile. It is **untrusted**: the sync engine only
/// compares fingerprints of successive bundles to decide when a re-sync is
/// worth triggering. Authorization always comes from the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsBundle {
    /// Role string as cached in the token (may be stale).
    #[serde(default)]
    pub role: String,
    /// Geographic hint as cached in the token (may be stale).
    #[serde(default)]
    pub scope_hint: ScopeHint,
}

impl ClaimsBundle {
    /// Canonical fingerprint of the hint, for change detection.
    ///
    /// Order-insensitive within each dimension so that a reordered token
    /// payload does not trigger a spurious re-sync.
    #[must_use]
    pub fn hint_fingerprint(&self) -> String {
        fn sorted(ids: &[String]) -> String {
            let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            ids.sort_unstable();
            ids.join(",")
        }
        format!(
            "{}|c:{}|a:{}|p:{}",
            self.role,
            sorted(&self.scope_hint.counties),
            sorted(&self.scope_hint.areas),
            sorted(&self.scope_hint.precincts),
        )
    }
}
