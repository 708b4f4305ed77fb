//! Hierarchy filter: narrows the reference catalog to an authoritative
//! scope.
//!
//! Pure and deterministic — the only side effect is a `warn!` per dropped
//! entity. Containment integrity (every included area's county present,
//! every included precinct's area present) holds by construction: the
//! filter never emits a child without also emitting its ancestor chain.
//!
//! # Grant vs. completion
//!
//! Two distinct reasons put an entity in the output:
//!
//! - **Granted** — explicitly listed in the scope, or implied by a granted
//!   parent under the role's policy (e.g. a county chair's county implies
//!   its areas). Granted parents propagate implication downward.
//! - **Completed** — pulled in only because a granted descendant needs its
//!   ancestor chain (a committeeperson's explicit precinct brings its area
//!   and county along). Completed ancestors do **not** propagate
//!   implication: the committeeperson does not gain the area's sibling
//!   precincts.
//!
//! Keeping the two sets separate is what prevents containment-completion
//! from silently widening access.
//!
//! # Dropped entities
//!
//! A scope ID with no catalog entry, or an explicit child whose parent
//! chain is missing from the catalog itself, is an authorization
//! inconsistency. Such entries are dropped and logged, never widened, and
//! reported in [`FilterOutcome::dropped`] so the orchestrator can surface
//! them.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::model::{AreaId, CountyId, FilteredCatalog, PrecinctId, ReferenceCatalog};
use crate::scope::{AuthoritativeScope, ScopeSet};

/// Why an entity referenced by the scope was left out of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The scope granted an ID that does not exist in the catalog.
    UnknownId,
    /// The entity's parent chain is missing from the catalog, so including
    /// it would break containment integrity.
    MissingParent,
}

/// An entity the filter refused to include, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntity {
    /// Entity type name ("county", "area", "precinct").
    pub entity: &'static str,
    /// The affected identifier.
    pub id: String,
    /// Why it was dropped.
    pub reason: DropReason,
}

/// Result of one filter run: the authorized catalog plus anything dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// The authorized subset, containment-complete.
    pub catalog: FilteredCatalog,
    /// Scope entries that could not be honored (logged as warnings).
    pub dropped: Vec<DroppedEntity>,
}

/// Narrows `catalog` to what `scope` authorizes.
///
/// Role-specific containment rules:
///
/// - A full-catalog role, or an unrestricted county dimension, sees the
///   entire catalog.
/// - A county is included iff explicitly granted (or completed from below).
/// - An area is included iff explicitly granted, or its county is granted
///   and the role's policy has `county_implies_areas`, or completed from a
///   granted precinct.
/// - A precinct is included iff explicitly granted, or its area is granted
///   and the role's policy has `area_implies_precincts`.
/// - Explicit membership and parent implication combine with OR.
/// - Groups are globally visible regardless of scope: they sit outside the
///   geographic hierarchy and act as a shared directory.
///
/// An empty scope for a recognized role yields a geographically empty
/// catalog (groups only), not an error.
#[must_use]
pub fn filter_catalog(catalog: &ReferenceCatalog, scope: &AuthoritativeScope) -> FilterOutcome {
    let policy = scope.role.policy();

    if policy.full_catalog || scope.counties.is_unrestricted() {
        debug!(role = %scope.role, "unrestricted scope, catalog passes through");
        let mut out = FilteredCatalog::default();
        for county in catalog.counties() {
            out.counties.insert(county.id.clone(), county.clone());
        }
        for area in catalog.areas() {
            out.areas.insert(area.id.clone(), area.clone());
        }
        for precinct in catalog.precincts() {
            out.precincts.insert(precinct.id.clone(), precinct.clone());
        }
        for group in catalog.groups() {
            out.groups.insert(group.id.clone(), group.clone());
        }
        return FilterOutcome {
            catalog: out,
            dropped: Vec::new(),
        };
    }

    let mut dropped = Vec::new();

    // Granted sets: entities the scope reaches directly or by policy
    // implication. These propagate implication downward.
    let mut granted_counties: BTreeSet<CountyId> = BTreeSet::new();
    let mut granted_areas: BTreeSet<AreaId> = BTreeSet::new();
    let mut granted_precincts: BTreeSet<PrecinctId> = BTreeSet::new();

    // Completed sets: ancestors pulled in solely for containment. These do
    // not propagate implication.
    let mut completed_counties: BTreeSet<CountyId> = BTreeSet::new();
    let mut completed_areas: BTreeSet<AreaId> = BTreeSet::new();

    report_unknown_ids(catalog, scope, &mut dropped);

    for county in catalog.counties() {
        if scope.counties.contains(county.id.as_str()) {
            granted_counties.insert(county.id.clone());
        }
    }

    for area in catalog.areas() {
        let explicit = scope.areas.contains(area.id.as_str());
        let implied = policy.county_implies_areas && granted_counties.contains(&area.county_id);
        if !explicit && !implied {
            continue;
        }
        if catalog.county(&area.county_id).is_none() {
            warn!(
                area = %area.id,
                county = %area.county_id,
                "dropping area: parent county missing from catalog"
            );
            dropped.push(DroppedEntity {
                entity: "area",
                id: area.id.to_string(),
                reason: DropReason::MissingParent,
            });
            continue;
        }
        granted_areas.insert(area.id.clone());
        if !granted_counties.contains(&area.county_id) {
            completed_counties.insert(area.county_id.clone());
        }
    }

    for precinct in catalog.precincts() {
        let explicit = scope.precincts.contains(precinct.id.as_str());
        let implied = policy.area_implies_precincts && granted_areas.contains(&precinct.area_id);
        if !explicit && !implied {
            continue;
        }
        if granted_areas.contains(&precinct.area_id) {
            granted_precincts.insert(precinct.id.clone());
            continue;
        }
        // Explicit precinct outside any granted area: complete its
        // ancestor chain, or drop it if the chain is broken.
        let Some(area) = catalog.area(&precinct.area_id) else {
            warn!(
                precinct = %precinct.id,
                area = %precinct.area_id,
                "dropping precinct: parent area missing from catalog"
            );
            dropped.push(DroppedEntity {
                entity: "precinct",
                id: precinct.id.to_string(),
                reason: DropReason::MissingParent,
            });
            continue;
        };
        if catalog.county(&area.county_id).is_none() {
            warn!(
                precinct = %precinct.id,
                area = %area.id,
                county = %area.county_id,
                "dropping precinct: grandparent county missing from catalog"
            );
            dropped.push(DroppedEntity {
                entity: "precinct",
                id: precinct.id.to_string(),
                reason: DropReason::MissingParent,
            });
            continue;
        }
        granted_precincts.insert(precinct.id.clone());
        completed_areas.insert(area.id.clone());
        if !granted_counties.contains(&area.county_id) {
            completed_counties.insert(area.county_id.clone());
        }
    }

    let mut out = FilteredCatalog::default();
    for id in granted_counties.iter().chain(completed_counties.iter()) {
        if let Some(county) = catalog.county(id) {
            out.counties.insert(county.id.clone(), county.clone());
        }
    }
    for id in granted_areas.iter().chain(completed_areas.iter()) {
        if let Some(area) = catalog.area(id) {
            out.areas.insert(area.id.clone(), area.clone());
        }
    }
    for id in &granted_precincts {
        if let Some(precinct) = catalog.precinct(id) {
            out.precincts.insert(precinct.id.clone(), precinct.clone());
        }
    }
    for group in catalog.groups() {
        out.groups.insert(group.id.clone(), group.clone());
    }

    debug!(
        role = %scope.role,
        counties = out.counties.len(),
        areas = out.areas.len(),
        precincts = out.precincts.len(),
        dropped = dropped.len(),
        "catalog filtered"
    );

    FilterOutcome {
        catalog: out,
        dropped,
    }
}

/// Reports scope IDs with no catalog entry.
///
/// Such IDs are not an error (the catalog and the profile can drift between
/// refreshes) but they are logged so a persistent mismatch is visible.
fn report_unknown_ids(
    catalog: &ReferenceCatalog,
    scope: &AuthoritativeScope,
    dropped: &mut Vec<DroppedEntity>,
) {
    if let ScopeSet::Ids(ids) = &scope.counties {
        for id in ids {
            if catalog.county(&CountyId::new(id.clone())).is_none() {
                warn!(county = %id, "scope grants a county missing from catalog");
                dropped.push(DroppedEntity {
                    entity: "county",
                    id: id.clone(),
                    reason: DropReason::UnknownId,
                });
            }
        }
    }
    if let ScopeSet::Ids(ids) = &scope.areas {
        for id in ids {
            if catalog.area(&AreaId::new(id.clone())).is_none() {
                warn!(area = %id, "scope grants an area missing from catalog");
                dropped.push(DroppedEntity {
                    entity: "area",
                    id: id.clone(),
                    reason: DropReason::UnknownId,
                });
            }
        }
    }
    if let ScopeSet::Ids(ids) = &scope.precincts {
        for id in ids {
            if catalog.precinct(&PrecinctId::new(id.clone())).is_none() {
                warn!(precinct = %id, "scope grants a precinct missing from catalog");
                dropped.push(DroppedEntity {
                    entity: "precinct",
                    id: id.clone(),
                    reason: DropReason::UnknownId,
                });
            }
        }
    }
}
