use crate::engine::{DuplicateDetector, EngineConfig, LinkEngine};
use crate::error::Result;
use crate::resolve::{MemoryPersonDirectory, MemoryResolver};
use crate::storage::{LinkStore, RedbLinkStore};
use crate::types::{
    Link, LinkSource, MatchOutcome, PersonRecord, Pid, RecordRef, TransactionContext,
};
use std::path::Path;
use std::sync::Arc;

/// Config for embedded library mode.
#[derive(Debug, Clone, Default)]
pub struct KindredConfig {
    /// Engine config. Conflict-retry budget and the fault-injection seam.
    pub engine: EngineConfig,
}

/// High-level, embedded Kindred API. No server required.
///
/// Wires the redb link store to in-memory resolver and person-directory
/// collaborators: callers register their record references up front and
/// drive link updates with plain reference strings.
///
/// # Example
/// ```rust,no_run
/// use kindred_core::{Kindred, KindredConfig, LinkSource, MatchOutcome, TransactionContext};
///
/// let kindred = Kindred::open("./links.redb", KindredConfig::default()).unwrap();
/// kindred.register_person("Person/1").unwrap();
/// kindred.register_record("Patient/1").unwrap();
///
/// let mut ctx = TransactionContext::new();
/// kindred
///     .update_link("Person/1", "Patient/1", MatchOutcome::Match, LinkSource::Automatic, &mut ctx)
///     .unwrap();
/// ```
pub struct Kindred {
    engine: Arc<LinkEngine<RedbLinkStore, MemoryResolver, MemoryPersonDirectory>>,
    detector: DuplicateDetector<RedbLinkStore, MemoryResolver, MemoryPersonDirectory>,
    resolver: Arc<MemoryResolver>,
    persons: Arc<MemoryPersonDirectory>,
}

impl Kindred {
    /// Open (or create) a link database at the given path.
    pub fn open(path: impl AsRef<Path>, config: KindredConfig) -> Result<Self> {
        let store = Arc::new(RedbLinkStore::open(path.as_ref())?);
        let resolver = Arc::new(MemoryResolver::new());
        let persons = Arc::new(MemoryPersonDirectory::new());
        let engine = Arc::new(LinkEngine::new(
            store,
            resolver.clone(),
            persons.clone(),
            config.engine,
        ));
        let detector = DuplicateDetector::new(engine.clone());

        Ok(Self {
            engine,
            detector,
            resolver,
            persons,
        })
    }

    /// Register a target record reference, minting a pid on first sight.
    pub fn register_record(&self, reference: &str) -> Result<Pid> {
        self.resolver.register(RecordRef::new(reference))
    }

    /// Register a canonical person reference, creating its empty person
    /// record on first sight.
    pub fn register_person(&self, reference: &str) -> Result<Pid> {
        let pid = self.resolver.register(RecordRef::new(reference))?;
        self.persons.register(pid)?;
        Ok(pid)
    }

    /// Apply a proposed classification to the link between a person and a
    /// target. See `LinkEngine::update_link`.
    pub fn update_link(
        &self,
        person_ref: &str,
        target_ref: &str,
        outcome: MatchOutcome,
        source: LinkSource,
        ctx: &mut TransactionContext,
    ) -> Result<Link> {
        self.engine.update_link(
            &RecordRef::new(person_ref),
            &RecordRef::new(target_ref),
            outcome,
            source,
            ctx,
        )
    }

    /// Existing link for the pair, or an unpersisted skeleton.
    pub fn get_or_create_link(&self, person_pid: Pid, target_pid: Pid) -> Result<Link> {
        self.engine.get_or_create(person_pid, target_pid)
    }

    pub fn find_link(&self, person_pid: Pid, target_pid: Pid) -> Result<Option<Link>> {
        self.engine.find_link(person_pid, target_pid)
    }

    pub fn find_links_by_target(&self, target_pid: Pid) -> Result<Vec<Link>> {
        self.engine.find_links_by_target(target_pid)
    }

    pub fn find_links_by_person(&self, person_pid: Pid) -> Result<Vec<Link>> {
        self.engine.find_links_by_person(person_pid)
    }

    pub fn find_matched_link_for_target(&self, target_pid: Pid) -> Result<Option<Link>> {
        self.engine.find_matched_link_for_target(target_pid)
    }

    /// Flag two persons as suspected duplicates.
    pub fn flag_possible_duplicate(
        &self,
        person_a: &str,
        person_b: &str,
        source: LinkSource,
        ctx: &mut TransactionContext,
    ) -> Result<Link> {
        self.detector.flag_possible_duplicate(
            &RecordRef::new(person_a),
            &RecordRef::new(person_b),
            source,
            ctx,
        )
    }

    pub fn list_possible_duplicates(&self) -> Result<Vec<Link>> {
        self.detector.list_possible_duplicates()
    }

    /// The person record as last persisted, if any.
    pub fn person(&self, pid: Pid) -> Result<Option<PersonRecord>> {
        use crate::resolve::PersonDirectory;
        self.persons.load(pid)
    }

    /// Recompute a person's target list from its confirmed-match links.
    pub fn sync_links_to_person(
        &self,
        person: &mut PersonRecord,
        ctx: &mut TransactionContext,
    ) -> Result<()> {
        self.engine.sync_links_to_person(person, ctx)
    }

    /// Delete every link referencing the record. Returns the count removed.
    pub fn purge_all_links_referencing(&self, record_ref: &str) -> Result<usize> {
        self.engine
            .purge_all_links_referencing(&RecordRef::new(record_ref))
    }

    pub fn link_count(&self) -> Result<u64> {
        self.engine.link_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_kindred() -> (Kindred, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let kindred = Kindred::open(
            temp_dir.path().join("api_test.redb"),
            KindredConfig::default(),
        )
        .unwrap();
        (kindred, temp_dir)
    }

    #[test]
    fn test_embedded_round_trip() {
        let (kindred, _temp) = open_kindred();
        let person_pid = kindred.register_person("Person/1").unwrap();
        let target_pid = kindred.register_record("Patient/1").unwrap();

        let mut ctx = TransactionContext::new();
        kindred
            .update_link(
                "Person/1",
                "Patient/1",
                MatchOutcome::Match,
                LinkSource::Automatic,
                &mut ctx,
            )
            .unwrap();

        assert_eq!(kindred.link_count().unwrap(), 1);
        let link = kindred.find_link(person_pid, target_pid).unwrap().unwrap();
        assert_eq!(link.outcome, MatchOutcome::Match);

        // The confirmed match was projected onto the person record
        let person = kindred.person(person_pid).unwrap().unwrap();
        assert!(person.has_target(target_pid));
    }

    #[test]
    fn test_unregistered_reference_fails() {
        let (kindred, _temp) = open_kindred();
        kindred.register_person("Person/1").unwrap();

        let mut ctx = TransactionContext::new();
        let err = kindred
            .update_link(
                "Person/1",
                "Patient/404",
                MatchOutcome::PossibleMatch,
                LinkSource::Automatic,
                &mut ctx,
            )
            .unwrap_err();
        assert!(matches!(err, crate::KindredError::ReferenceNotResolvable(_)));
        assert_eq!(kindred.link_count().unwrap(), 0);
    }

    #[test]
    fn test_purge_via_facade() {
        let (kindred, _temp) = open_kindred();
        let person_pid = kindred.register_person("Person/1").unwrap();
        let target_pid = kindred.register_record("Patient/1").unwrap();

        let mut ctx = TransactionContext::new();
        kindred
            .update_link(
                "Person/1",
                "Patient/1",
                MatchOutcome::PossibleMatch,
                LinkSource::Automatic,
                &mut ctx,
            )
            .unwrap();

        assert_eq!(kindred.purge_all_links_referencing("Patient/1").unwrap(), 1);
        assert!(kindred.find_link(person_pid, target_pid).unwrap().is_none());

        let err = kindred.purge_all_links_referencing("Patient/404").unwrap_err();
        assert!(matches!(
            err,
            crate::KindredError::IdentifierResolutionRequired(_)
        ));
    }
}
