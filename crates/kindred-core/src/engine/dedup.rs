//! Duplicate detection between canonical persons.
//!
//! A suspected duplicate is just a link with the `PossibleDuplicate` outcome
//! whose two ends are person records, so the detector is a thin specialization
//! of the resolution engine plus a registry query. The caller's types
//! guarantee both references are persons; the store does not re-check.

use crate::engine::resolution::LinkEngine;
use crate::error::Result;
use crate::resolve::{PersonDirectory, ReferenceResolver};
use crate::storage::LinkStore;
use crate::types::{Link, LinkSource, MatchOutcome, RecordRef, TransactionContext};
use std::sync::Arc;

/// Flags and lists suspected duplicate canonical persons.
pub struct DuplicateDetector<S: LinkStore, R: ReferenceResolver, P: PersonDirectory> {
    engine: Arc<LinkEngine<S, R, P>>,
}

impl<S: LinkStore, R: ReferenceResolver, P: PersonDirectory> DuplicateDetector<S, R, P> {
    pub fn new(engine: Arc<LinkEngine<S, R, P>>) -> Self {
        Self { engine }
    }

    /// Record that two persons are suspected of being the same identity.
    ///
    /// Goes through the resolution engine, so a prior `NoMatch` assertion
    /// between the pair — in either orientation — silently suppresses the
    /// proposal, and the usual precedence rules apply.
    pub fn flag_possible_duplicate(
        &self,
        person_a: &RecordRef,
        person_b: &RecordRef,
        source: LinkSource,
        ctx: &mut TransactionContext,
    ) -> Result<Link> {
        self.engine.update_link(
            person_a,
            person_b,
            MatchOutcome::PossibleDuplicate,
            source,
            ctx,
        )
    }

    /// All links currently holding suspected duplicate persons.
    pub fn list_possible_duplicates(&self) -> Result<Vec<Link>> {
        self.engine.list_possible_duplicates()
    }
}
