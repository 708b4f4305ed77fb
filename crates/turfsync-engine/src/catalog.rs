//! Reference catalog source.
//!
//! The reference data catalog collaborator supplies the full, unfiltered
//! universe of counties, areas, precincts, and groups. Only the sync
//! orchestrator reads it: consuming views must go through the local mirror,
//! because the raw catalog bypasses authorization.

use std::sync::Arc;

use async_trait::async_trait;
use turfsync_core::model::ReferenceCatalog;

use crate::error::SyncError;

/// Supplies the full reference catalog for one sync pass.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetches the current catalog.
    async fn fetch(&self) -> Result<ReferenceCatalog, SyncError>;
}

/// A catalog source backed by a pre-loaded, periodically refreshed dataset.
#[derive(Debug, Clone)]
pub struct StaticCatalogSource {
    catalog: Arc<ReferenceCatalog>,
}

impl StaticCatalogSource {
    /// Wraps an already-loaded catalog.
    #[must_use]
    pub fn new(catalog: ReferenceCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn fetch(&self) -> Result<ReferenceCatalog, SyncError> {
        Ok(ReferenceCatalog::clone(&self.catalog))
    }
}
