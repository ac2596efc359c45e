use crate::error::Result;
use crate::storage::filters::LinkFilter;
use crate::types::{Link, MatchOutcome, Pid};

/// Storage contract for link records.
///
/// The store exclusively owns link rows; all mutation goes through
/// `save`/`insert_new`/`delete`, never direct table access. At most one link
/// exists per ordered `(person, target)` pair.
pub trait LinkStore: Send + Sync {
    // === Pair lookups ===

    /// Unique link for the ordered pair, or none. Fails with `InvalidInput`
    /// if either pid is nil — callers must short-circuit before calling.
    fn find(&self, person: Pid, target: Pid) -> Result<Option<Link>>;

    /// Direction-agnostic lookup: tries `(a, b)` then `(b, a)`.
    ///
    /// Duplicate-detection links between two persons may have been stored in
    /// either orientation; this helper exists so callers cannot forget the
    /// reverse probe.
    fn find_either_orientation(&self, a: Pid, b: Pid) -> Result<Option<Link>> {
        if let Some(link) = self.find(a, b)? {
            return Ok(Some(link));
        }
        self.find(b, a)
    }

    // === Attribute-filtered queries ===

    /// List links matching the filter
    fn find_links(&self, filter: LinkFilter) -> Result<Vec<Link>>;

    /// The unique link for a target with the given outcome, if any
    fn find_by_target_and_outcome(&self, target: Pid, outcome: MatchOutcome)
        -> Result<Option<Link>>;

    /// All links whose target end is this pid
    fn find_all_by_target(&self, target: Pid) -> Result<Vec<Link>>;

    /// All links whose person end is this pid
    fn find_all_by_person(&self, person: Pid) -> Result<Vec<Link>>;

    /// The confirmed-match link for a target, if any
    fn find_matched_for_target(&self, target: Pid) -> Result<Option<Link>> {
        self.find_by_target_and_outcome(target, MatchOutcome::Match)
    }

    /// All links holding suspected duplicate persons
    fn find_all_possible_duplicates(&self) -> Result<Vec<Link>> {
        self.find_links(LinkFilter::new().with_outcome(MatchOutcome::PossibleDuplicate))
    }

    // === Mutation ===

    /// Upsert keyed by the pair. Preserves the stored `created_at` when the
    /// pair already exists; always refreshes `updated_at`. Returns the link
    /// as persisted.
    fn save(&self, link: &Link) -> Result<Link>;

    /// Insert that fails with `StorageConflict` when the pair already
    /// exists. The engine converts a losing insert into a re-read + update.
    fn insert_new(&self, link: &Link) -> Result<Link>;

    /// Conditional update keyed by the pair. Fails with `StorageConflict`
    /// unless the stored row still carries `expected`'s outcome, source,
    /// and `updated_at` at the moment of the write. The update half of the
    /// lost-update contract: a row written by a rival between the caller's
    /// read and this write invalidates the snapshot, and the caller must
    /// re-read and re-decide.
    fn save_if_unchanged(&self, link: &Link, expected: &Link) -> Result<Link>;

    /// Remove one link. Runs in its own commit scope so a corrective
    /// deletion survives even if the enclosing operation later fails.
    fn delete(&self, link: &Link) -> Result<()>;

    /// Remove every link referencing this pid on either end. Returns the
    /// number of rows removed. Used by the purge hook.
    fn delete_all_referencing(&self, pid: Pid) -> Result<usize>;

    // === Observability ===

    /// Total number of stored links
    fn count(&self) -> Result<u64>;
}
