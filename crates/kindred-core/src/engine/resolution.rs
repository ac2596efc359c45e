use crate::engine::config::EngineConfig;
use crate::engine::precedence::{self, Decision};
use crate::engine::projector;
use crate::error::{KindredError, Result};
use crate::resolve::{PersonDirectory, ReferenceResolver};
use crate::storage::LinkStore;
use crate::types::{Link, LinkSource, MatchOutcome, PersonRecord, Pid, RecordRef, TransactionContext};
use std::sync::Arc;

/// Orchestrates link updates: resolves references, consults the precedence
/// policy, persists the result, and keeps the person's denormalized target
/// list in step with its confirmed-match links.
pub struct LinkEngine<S: LinkStore, R: ReferenceResolver, P: PersonDirectory> {
    store: Arc<S>,
    resolver: Arc<R>,
    persons: Arc<P>,
    config: EngineConfig,
}

impl<S: LinkStore, R: ReferenceResolver, P: PersonDirectory> LinkEngine<S, R, P> {
    pub fn new(store: Arc<S>, resolver: Arc<R>, persons: Arc<P>, config: EngineConfig) -> Self {
        Self {
            store,
            resolver,
            persons,
            config,
        }
    }

    /// Apply a proposed classification to the link between a person and a
    /// target, subject to the precedence policy.
    ///
    /// Resolves both references, loads the existing link (both orientations
    /// for duplicate proposals), and then either creates, updates, no-ops,
    /// or fails with `PrecedenceViolation`. When the resulting outcome is a
    /// confirmed match, the person's target list is re-projected within the
    /// same request. A losing write race, whether the rival inserted first
    /// or overwrote the row the decision was made against, is retried once
    /// by re-reading and re-deciding.
    pub fn update_link(
        &self,
        person_ref: &RecordRef,
        target_ref: &RecordRef,
        outcome: MatchOutcome,
        source: LinkSource,
        ctx: &mut TransactionContext,
    ) -> Result<Link> {
        let person_pid = self.resolve_required(person_ref)?;
        let target_pid = self.resolve_required(target_ref)?;

        let mut attempts_left = self.config.conflict_retries + 1;
        loop {
            let forward = self.store.find(person_pid, target_pid)?;
            let reversed = if outcome == MatchOutcome::PossibleDuplicate {
                self.store.find(target_pid, person_pid)?
            } else {
                None
            };

            // A hit in either orientation counts as the existing link for a
            // duplicate proposal; storage is never duplicated across
            // orientations.
            let (existing, other) = if forward.is_some() {
                (forward, reversed)
            } else {
                (reversed, None)
            };

            match precedence::decide(existing.as_ref(), other.as_ref(), outcome, source) {
                Decision::Reject(reason) => {
                    return Err(KindredError::PrecedenceViolation(reason));
                }
                Decision::NoOp => {
                    return existing.ok_or_else(|| {
                        KindredError::Validation("No-op decision without an existing link".into())
                    });
                }
                Decision::Apply => {
                    let was_match = existing
                        .as_ref()
                        .map(|l| l.outcome == MatchOutcome::Match)
                        .unwrap_or(false);
                    let prior = existing;
                    let mut link = prior
                        .clone()
                        .unwrap_or_else(|| Link::draft(person_pid, target_pid));
                    link.outcome = outcome;
                    link.source = source;

                    if let Some(faults) = &self.config.faults {
                        faults.before_save(&link)?;
                    }

                    // Updates are conditional on the snapshot the decision
                    // was made against; a rival write in between invalidates
                    // it and the cycle re-reads and re-decides.
                    let persisted = match &prior {
                        Some(expected) => self.store.save_if_unchanged(&link, expected),
                        None => self.store.insert_new(&link),
                    };

                    let saved = match persisted {
                        Ok(saved) => saved,
                        Err(KindredError::StorageConflict { .. }) if attempts_left > 1 => {
                            // Lost a write race; re-read and re-decide
                            // against the winner's row.
                            attempts_left -= 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let message = format!(
                        "Creating Link from {} to {} -> {}",
                        person_ref, target_ref, outcome
                    );
                    ctx.add_message(&message);
                    log::debug!("{}", message);

                    // Re-project on any transition into or out of a
                    // confirmed match, so a downgrade evicts the target from
                    // the person's denormalized list in the same request.
                    if saved.outcome == MatchOutcome::Match || was_match {
                        self.sync_person_by_pid(saved.person_pid, ctx)?;
                    }

                    return Ok(saved);
                }
            }
        }
    }

    /// Existing link for the pair, or an unpersisted skeleton. Never writes.
    pub fn get_or_create(&self, person_pid: Pid, target_pid: Pid) -> Result<Link> {
        match self.store.find(person_pid, target_pid)? {
            Some(link) => Ok(link),
            None => Ok(Link::draft(person_pid, target_pid)),
        }
    }

    /// Recompute a person's denormalized target list from its
    /// confirmed-match links and persist the record if anything changed.
    pub fn sync_links_to_person(
        &self,
        person: &mut PersonRecord,
        ctx: &mut TransactionContext,
    ) -> Result<()> {
        let changed = projector::project_matches(self.store.as_ref(), person, ctx)?;
        if changed {
            self.persons.persist(person)?;
        }
        Ok(())
    }

    pub(crate) fn sync_person_by_pid(&self, pid: Pid, ctx: &mut TransactionContext) -> Result<()> {
        let mut person = self.persons.load(pid)?.ok_or_else(|| {
            KindredError::ReferenceNotResolvable(format!(
                "No canonical person record for pid {}",
                pid
            ))
        })?;
        self.sync_links_to_person(&mut person, ctx)
    }

    // === Query pass-throughs ===

    pub fn find_link(&self, person_pid: Pid, target_pid: Pid) -> Result<Option<Link>> {
        self.store.find(person_pid, target_pid)
    }

    pub fn find_links_by_target(&self, target_pid: Pid) -> Result<Vec<Link>> {
        self.store.find_all_by_target(target_pid)
    }

    pub fn find_links_by_person(&self, person_pid: Pid) -> Result<Vec<Link>> {
        self.store.find_all_by_person(person_pid)
    }

    pub fn find_matched_link_for_target(&self, target_pid: Pid) -> Result<Option<Link>> {
        self.store.find_matched_for_target(target_pid)
    }

    pub fn list_possible_duplicates(&self) -> Result<Vec<Link>> {
        self.store.find_all_possible_duplicates()
    }

    pub fn link_count(&self) -> Result<u64> {
        self.store.count()
    }

    /// Resolve a reference that the current operation cannot proceed
    /// without.
    pub(crate) fn resolve_required(&self, reference: &RecordRef) -> Result<Pid> {
        self.resolver
            .resolve(reference)?
            .ok_or_else(|| KindredError::ReferenceNotResolvable(reference.to_string()))
    }

    pub(crate) fn store(&self) -> &S {
        self.store.as_ref()
    }

    pub(crate) fn persons(&self) -> &P {
        self.persons.as_ref()
    }
}
