//! File location index: which nodes hold an ACTIVE copy of a file

use crate::common::Result;
use crate::coordinator::metadata::{FileLocation, LocationStatus, MetadataStore};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct LocationIndex {
    store: Arc<MetadataStore>,
}

impl LocationIndex {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    /// Node ids with an ACTIVE row for `file_key`
    pub fn get_locations(&self, file_key: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_locations(file_key)?
            .into_iter()
            .filter(|l| l.status == LocationStatus::Active)
            .map(|l| l.node_id)
            .collect())
    }

    /// Upsert an ACTIVE row. Idempotent.
    pub fn mark_active(&self, file_key: &str, node_id: &str) -> Result<()> {
        self.store.put_location(&FileLocation {
            file_key: file_key.to_string(),
            node_id: node_id.to_string(),
            status: LocationStatus::Active,
            updated_at: Utc::now(),
        })
    }

    /// Flip an existing row to DELETED; no row means nothing to do
    pub fn mark_deleted(&self, file_key: &str, node_id: &str) -> Result<()> {
        match self.store.get_location(file_key, node_id)? {
            Some(mut location) => {
                location.status = LocationStatus::Deleted;
                location.updated_at = Utc::now();
                self.store.put_location(&location)
            }
            None => Ok(()),
        }
    }

    /// Hard-delete all rows of a file (whole-file deletion only)
    pub fn purge(&self, file_key: &str) -> Result<usize> {
        self.store.delete_locations(file_key)
    }
}
