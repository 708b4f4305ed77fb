//! Roles and the per-role access policy table.
//!
//! Which roles inherit child visibility from a granted parent ("a county
//! chair sees every area in their county") is data, not control flow: each
//! role maps to one [`AccessPolicy`] row. Adding a role means adding an
//! enum variant and a table row, not new branches in the filter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The effective role of a signed-in user, as reported by the profile
/// resolver.
///
/// The wire form is a lowercase snake_case string; unknown strings are a
/// validation failure at the scope boundary, never coerced to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Top-level administrative role; sees the entire catalog.
    Admin,
    /// Chairs a county; county access implies all child areas and, through
    /// them, all child precincts.
    CountyChair,
    /// Chairs an area; area access implies all child precincts, but county
    /// access (if any) does not widen to unlisted areas.
    AreaChair,
    /// Precinct-level volunteer; sees only explicitly assigned entities.
    Committeeperson,
}

impl Role {
    /// All recognized roles, in privilege order.
    pub const ALL: [Self; 4] = [
        Self::Admin,
        Self::CountyChair,
        Self::AreaChair,
        Self::Committeeperson,
    ];

    /// Parses the wire string form of a role.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "county_chair" => Some(Self::CountyChair),
            "area_chair" => Some(Self::AreaChair),
            "committeeperson" => Some(Self::Committeeperson),
            _ => None,
        }
    }

    /// Returns the wire string form of this role.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::CountyChair => "county_chair",
            Self::AreaChair => "area_chair",
            Self::Committeeperson => "committeeperson",
        }
    }

    /// Returns this role's row in the access policy table.
    #[must_use]
    pub const fn policy(self) -> AccessPolicy {
        match self {
            Self::Admin => AccessPolicy {
                full_catalog: true,
                county_implies_areas: true,
                area_implies_precincts: true,
            },
            Self::CountyChair => AccessPolicy {
                full_catalog: false,
                county_implies_areas: true,
                area_implies_precincts: true,
            },
            Self::AreaChair => AccessPolicy {
                full_catalog: false,
                county_implies_areas: false,
                area_implies_precincts: true,
            },
            Self::Committeeperson => AccessPolicy {
                full_catalog: false,
                county_implies_areas: false,
                area_implies_precincts: false,
            },
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One row of the role → visibility-inheritance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    /// The role sees the entire catalog; scope dimensions are ignored.
    pub full_catalog: bool,
    /// An included county implies all areas it contains.
    pub county_implies_areas: bool,
    /// An included area implies all precincts it contains.
    pub area_implies_precincts: bool,
}
