//! Synchronization projector: keeps a person's denormalized target list in
//! agreement with its confirmed-match links.
//!
//! The link table is the source of truth; the list on the person record is a
//! projection of it. Only `Match` links are projected — a downgraded or
//! no-matched link drops out of the list on the next sync, and a `NoMatch`
//! can never evict anything it did not put there.

use crate::error::Result;
use crate::storage::{LinkFilter, LinkStore};
use crate::types::{MatchOutcome, PersonRecord, TransactionContext};

/// Reconcile `person.link_targets` against the person's stored `Match`
/// links. Adds missing targets, removes stale ones. Returns whether the
/// list changed; write-back is the caller's job.
pub fn project_matches<S: LinkStore>(
    store: &S,
    person: &mut PersonRecord,
    ctx: &mut TransactionContext,
) -> Result<bool> {
    let matched = store.find_links(
        LinkFilter::new()
            .with_person(person.pid)
            .with_outcome(MatchOutcome::Match),
    )?;

    let expected: Vec<_> = matched.iter().map(|link| link.target_pid).collect();

    let mut added = 0usize;
    for target in &expected {
        if !person.link_targets.contains(target) {
            person.link_targets.push(*target);
            added += 1;
        }
    }

    let before = person.link_targets.len();
    person.link_targets.retain(|target| expected.contains(target));
    let removed = before - person.link_targets.len();

    let changed = added > 0 || removed > 0;
    if changed {
        ctx.add_message(format!(
            "Syncing links to person {}: {} added, {} removed, {} total",
            person.pid,
            added,
            removed,
            person.link_targets.len()
        ));
    }

    Ok(changed)
}
