//! Purge hook: referential cleanup when a record is permanently destroyed.
//!
//! Called by the external resource-deletion collaborator around a physical
//! expunge, never by the matching machinery itself.

use crate::engine::resolution::LinkEngine;
use crate::error::{KindredError, Result};
use crate::resolve::{PersonDirectory, ReferenceResolver};
use crate::storage::LinkStore;
use crate::types::RecordRef;

impl<S: LinkStore, R: ReferenceResolver, P: PersonDirectory> LinkEngine<S, R, P> {
    /// Delete every link referencing the record on either end. Returns the
    /// number of rows removed; zero rows is a success.
    ///
    /// Purge must be precise, so an unresolvable reference is fatal rather
    /// than treated as "nothing to do".
    pub fn purge_all_links_referencing(&self, record_ref: &RecordRef) -> Result<usize> {
        let pid = self
            .resolve_required(record_ref)
            .map_err(|_| KindredError::IdentifierResolutionRequired(record_ref.to_string()))?;

        let removed = self.store().delete_all_referencing(pid)?;
        if removed > 0 {
            log::info!("Removed {} links with references to {}", removed, record_ref);
        }
        Ok(removed)
    }
}
