//! Reference data model: counties, areas, precincts, and groups.
//!
//! Each child entity carries the identifier of its immediate parent
//! (Area → County, Precinct → Area). Identifiers are stable opaque strings
//! issued by the reference data catalog, wrapped in newtypes so a county ID
//! can never be passed where a precinct ID is expected.
//!
//! Two containers are defined:
//!
//! - [`ReferenceCatalog`] — the full, unfiltered universe, indexed by ID.
//! - [`FilteredCatalog`] — the authorized subset produced by the hierarchy
//!   filter. Ordered containers are used throughout so that two identical
//!   filter runs produce identical content, which the sync engine relies on
//!   for its idempotence guarantee.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identifier of a county.
    CountyId
);
string_id!(
    /// Stable identifier of an area within a county.
    AreaId
);
string_id!(
    /// Stable identifier of a precinct within an area.
    PrecinctId
);
string_id!(
    /// Stable identifier of a group/organization.
    GroupId
);

/// A county: top level of the geographic hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct County {
    /// Stable identifier.
    pub id: CountyId,
    /// Display name.
    pub name: String,
}

/// An area: second level, contained in exactly one county.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Stable identifier.
    pub id: AreaId,
    /// Identifier of the parent county.
    pub county_id: CountyId,
    /// Display name.
    pub name: String,
}

/// A precinct: leaf level, contained in exactly one area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precinct {
    /// Stable identifier.
    pub id: PrecinctId,
    /// Identifier of the parent area.
    pub area_id: AreaId,
    /// Display name.
    pub name: String,
}

/// A group/organization. Groups sit outside the geographic hierarchy and
/// are currently visible to every recognized role (see the filter module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier.
    pub id: GroupId,
    /// Display name.
    pub name: String,
}

/// Errors raised while assembling a [`ReferenceCatalog`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    /// The same identifier appeared twice within one entity type.
    #[error("duplicate {entity} id: {id}")]
    DuplicateId {
        /// Entity type name ("county", "area", "precinct", "group").
        entity: &'static str,
        /// The offending identifier.
        id: String,
    },
}

/// The full, unfiltered reference universe, indexed by ID.
///
/// This is supplied by the reference data catalog collaborator. Consumers
/// of the sync engine must never read it directly — only the filtered
/// local mirror — because the raw catalog bypasses authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceCatalog {
    counties: BTreeMap<CountyId, County>,
    areas: BTreeMap<AreaId, Area>,
    precincts: BTreeMap<PrecinctId, Precinct>,
    groups: BTreeMap<GroupId, Group>,
}

impl ReferenceCatalog {
    /// Builds an indexed catalog from flat entity lists.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateId`] if any identifier repeats
    /// within its entity type. Dangling parent references are *not* an
    /// error here; the hierarchy filter treats them as containment
    /// violations and drops the affected children.
    pub fn new(
        counties: Vec<County>,
        areas: Vec<Area>,
        precincts: Vec<Precinct>,
        groups: Vec<Group>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for county in counties {
            if catalog
                .counties
                .insert(county.id.clone(), county.clone())
                .is_some()
            {
                return Err(CatalogError::DuplicateId {
                    entity: "county",
                    id: county.id.to_string(),
                });
            }
        }
        for area in areas {
            if catalog.areas.insert(area.id.clone(), area.clone()).is_some() {
                return Err(CatalogError::DuplicateId {
                    entity: "area",
                    id: area.id.to_string(),
                });
            }
        }
        for precinct in precincts {
            if catalog
                .precincts
                .insert(precinct.id.clone(), precinct.clone())
                .is_some()
            {
                return Err(CatalogError::DuplicateId {
                    entity: "precinct",
                    id: precinct.id.to_string(),
                });
            }
        }
        for group in groups {
            if catalog
                .groups
                .insert(group.id.clone(), group.clone())
                .is_some()
            {
                return Err(CatalogError::DuplicateId {
                    entity: "group",
                    id: group.id.to_string(),
                });
            }
        }
        Ok(catalog)
    }

    /// Looks up a county by ID.
    #[must_use]
    pub fn county(&self, id: &CountyId) -> Option<&County> {
        self.counties.get(id)
    }

    /// Looks up an area by ID.
    #[must_use]
    pub fn area(&self, id: &AreaId) -> Option<&Area> {
        self.areas.get(id)
    }

    /// Looks up a precinct by ID.
    #[must_use]
    pub fn precinct(&self, id: &PrecinctId) -> Option<&Precinct> {
        self.precincts.get(id)
    }

    /// Iterates all counties in ID order.
    pub fn counties(&self) -> impl Iterator<Item = &County> {
        self.counties.values()
    }

    /// Iterates all areas in ID order.
    pub fn areas(&self) -> impl Iterator<Item = &Area> {
        self.areas.values()
    }

    /// Iterates all precincts in ID order.
    pub fn precincts(&self) -> impl Iterator<Item = &Precinct> {
        self.precincts.values()
    }

    /// Iterates all groups in ID order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Iterates the areas whose parent is the given county.
    pub fn areas_in_county<'a>(
        &'a self,
        county_id: &'a CountyId,
    ) -> impl Iterator<Item = &'a Area> {
        self.areas.values().filter(move |a| &a.county_id == county_id)
    }

    /// Iterates the precincts whose parent is the given area.
    pub fn precincts_in_area<'a>(
        &'a self,
        area_id: &'a AreaId,
    ) -> impl Iterator<Item = &'a Precinct> {
        self.precincts.values().filter(move |p| &p.area_id == area_id)
    }
}

/// The authorized subset of the reference catalog.
///
/// Produced exclusively by the hierarchy filter. Containment integrity —
/// every area's county and every precinct's area present — is guaranteed by
/// the filter's construction, not re-checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredCatalog {
    /// Included counties, in ID order.
    pub counties: BTreeMap<CountyId, County>,
    /// Included areas, in ID order.
    pub areas: BTreeMap<AreaId, Area>,
    /// Included precincts, in ID order.
    pub precincts: BTreeMap<PrecinctId, Precinct>,
    /// Included groups, in ID order.
    pub groups: BTreeMap<GroupId, Group>,
}

impl FilteredCatalog {
    /// Returns true when no geographic entity survived filtering.
    ///
    /// Groups are excluded from this check: they are globally visible, so
    /// an unprivileged user's catalog is "empty" even though groups remain.
    #[must_use]
    pub fn is_geographically_empty(&self) -> bool {
        self.counties.is_empty() && self.areas.is_empty() && self.precincts.is_empty()
    }

    /// Total number of entities across all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counties.len() + self.areas.len() + self.precincts.len() + self.groups.len()
    }

    /// Returns true when the catalog holds no entities at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
