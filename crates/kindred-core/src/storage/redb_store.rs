use crate::error::{KindredError, Result};
use crate::storage::filters::LinkFilter;
use crate::storage::traits::LinkStore;
use crate::types::{Link, MatchOutcome, Pid};
use chrono::Utc;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Primary table: ordered pair key (person pid ++ target pid) -> link record
const LINKS: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("links");

// Secondary indexes, pid -> pair keys
const LINKS_BY_PERSON: MultimapTableDefinition<&[u8; 16], &[u8; 32]> =
    MultimapTableDefinition::new("links_by_person");
const LINKS_BY_TARGET: MultimapTableDefinition<&[u8; 16], &[u8; 32]> =
    MultimapTableDefinition::new("links_by_target");

// Metadata table
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Redb-based link store.
///
/// Keying the primary table by the ordered pid pair gives the uniqueness
/// constraint for free: two concurrent inserts for the same pair cannot both
/// land, and redb serializes writers so every read-decide-write cycle sees a
/// consistent snapshot. Each mutating call is its own committed write
/// transaction, which is also what gives `delete` its independent commit
/// scope.
#[derive(Debug)]
pub struct RedbLinkStore {
    db: Arc<Database>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl RedbLinkStore {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KindredError::Validation(format!("Failed to create directory: {}", e))
            })?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LINKS)?;
            let _ = write_txn.open_multimap_table(LINKS_BY_PERSON)?;
            let _ = write_txn.open_multimap_table(LINKS_BY_TARGET)?;
            let mut meta = write_txn.open_table(META)?;
            if is_new {
                meta.insert(
                    SCHEMA_VERSION_KEY,
                    CURRENT_SCHEMA_VERSION.to_string().as_bytes(),
                )?;
            }
        }
        write_txn.commit()?;

        if !is_new {
            Self::check_schema_version(&db)?;
        }

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Check schema version. Returns error on mismatch.
    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(CURRENT_SCHEMA_VERSION)
        };

        if version != CURRENT_SCHEMA_VERSION {
            return Err(KindredError::Validation(format!(
                "Database schema v{} does not match this binary's v{}",
                version, CURRENT_SCHEMA_VERSION
            )));
        }
        Ok(())
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ordered pair key for the primary table
    fn pair_key(person: Pid, target: Pid) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(person.as_bytes());
        key[16..].copy_from_slice(target.as_bytes());
        key
    }

    fn serialize_link(link: &Link) -> Result<Vec<u8>> {
        bincode::serialize(link).map_err(KindredError::from)
    }

    fn deserialize_link(bytes: &[u8]) -> Result<Link> {
        bincode::deserialize(bytes).map_err(KindredError::from)
    }

    /// Check if a link matches the filter criteria
    fn link_matches_filter(link: &Link, filter: &LinkFilter) -> bool {
        if let Some(person) = filter.person {
            if link.person_pid != person {
                return false;
            }
        }

        if let Some(target) = filter.target {
            if link.target_pid != target {
                return false;
            }
        }

        if let Some(outcome) = filter.outcome {
            if link.outcome != outcome {
                return false;
            }
        }

        if let Some(source) = filter.source {
            if link.source != source {
                return false;
            }
        }

        true
    }

    /// Insert the pair key into both secondary indexes
    fn index_link(&self, txn: &redb::WriteTransaction, link: &Link) -> Result<()> {
        let key = Self::pair_key(link.person_pid, link.target_pid);

        {
            let mut person_index = txn.open_multimap_table(LINKS_BY_PERSON)?;
            person_index.insert(link.person_pid.as_bytes(), &key)?;
        }

        {
            let mut target_index = txn.open_multimap_table(LINKS_BY_TARGET)?;
            target_index.insert(link.target_pid.as_bytes(), &key)?;
        }

        Ok(())
    }

    /// Remove the pair key from both secondary indexes
    fn unindex_link(&self, txn: &redb::WriteTransaction, link: &Link) -> Result<()> {
        let key = Self::pair_key(link.person_pid, link.target_pid);

        {
            let mut person_index = txn.open_multimap_table(LINKS_BY_PERSON)?;
            person_index.remove(link.person_pid.as_bytes(), &key)?;
        }

        {
            let mut target_index = txn.open_multimap_table(LINKS_BY_TARGET)?;
            target_index.remove(link.target_pid.as_bytes(), &key)?;
        }

        Ok(())
    }

    /// Load the links behind a set of pair keys from an open read transaction
    fn load_keys(
        links_table: &impl ReadableTable<&'static [u8; 32], &'static [u8]>,
        keys: impl IntoIterator<Item = [u8; 32]>,
    ) -> Result<Vec<Link>> {
        let mut links = Vec::new();
        for key in keys {
            if let Some(bytes) = links_table.get(&key)? {
                links.push(Self::deserialize_link(bytes.value())?);
            }
        }
        Ok(links)
    }
}

impl LinkStore for RedbLinkStore {
    fn find(&self, person: Pid, target: Pid) -> Result<Option<Link>> {
        if person.is_nil() || target.is_nil() {
            return Err(KindredError::InvalidInput(
                "Link lookup requires both a person pid and a target pid".into(),
            ));
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LINKS)?;
        let key = Self::pair_key(person, target);

        if let Some(bytes) = table.get(&key)? {
            let link = Self::deserialize_link(bytes.value())?;
            Ok(Some(link))
        } else {
            Ok(None)
        }
    }

    fn find_links(&self, filter: LinkFilter) -> Result<Vec<Link>> {
        let read_txn = self.db.begin_read()?;
        let links_table = read_txn.open_table(LINKS)?;

        // Use the narrowest available index
        let mut links = if let Some(person) = filter.person {
            if person.is_nil() {
                return Ok(Vec::new());
            }
            let person_index = read_txn.open_multimap_table(LINKS_BY_PERSON)?;
            let keys: Vec<[u8; 32]> = person_index
                .get(person.as_bytes())?
                .map(|r| r.map(|g| *g.value()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Self::load_keys(&links_table, keys)?
        } else if let Some(target) = filter.target {
            if target.is_nil() {
                return Ok(Vec::new());
            }
            let target_index = read_txn.open_multimap_table(LINKS_BY_TARGET)?;
            let keys: Vec<[u8; 32]> = target_index
                .get(target.as_bytes())?
                .map(|r| r.map(|g| *g.value()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Self::load_keys(&links_table, keys)?
        } else {
            // Full table scan
            let mut all = Vec::new();
            for item in links_table.iter()? {
                let (_, value) = item?;
                all.push(Self::deserialize_link(value.value())?);
            }
            all
        };

        links.retain(|link| Self::link_matches_filter(link, &filter));

        // Newest first
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            links.truncate(limit);
        }

        Ok(links)
    }

    fn find_by_target_and_outcome(
        &self,
        target: Pid,
        outcome: MatchOutcome,
    ) -> Result<Option<Link>> {
        let links = self.find_links(
            LinkFilter::new()
                .with_target(target)
                .with_outcome(outcome)
                .with_limit(1),
        )?;
        Ok(links.into_iter().next())
    }

    fn find_all_by_target(&self, target: Pid) -> Result<Vec<Link>> {
        self.find_links(LinkFilter::new().with_target(target))
    }

    fn find_all_by_person(&self, person: Pid) -> Result<Vec<Link>> {
        self.find_links(LinkFilter::new().with_person(person))
    }

    fn save(&self, link: &Link) -> Result<Link> {
        let key = Self::pair_key(link.person_pid, link.target_pid);

        let write_txn = self.db.begin_write()?;

        // Preserve the stored created_at on update
        let existing_created = {
            let links_table = write_txn.open_table(LINKS)?;
            let old_bytes = links_table.get(&key)?.map(|guard| guard.value().to_vec());
            old_bytes
                .map(|bytes| Self::deserialize_link(&bytes))
                .transpose()?
                .map(|old| old.created_at)
        };

        let mut stored = link.clone();
        if let Some(created) = existing_created {
            stored.created_at = created;
        }
        stored.updated_at = Utc::now();

        let link_bytes = Self::serialize_link(&stored)?;
        {
            let mut links_table = write_txn.open_table(LINKS)?;
            links_table.insert(&key, link_bytes.as_slice())?;
        }

        self.index_link(&write_txn, &stored)?;
        write_txn.commit()?;

        Ok(stored)
    }

    fn insert_new(&self, link: &Link) -> Result<Link> {
        let key = Self::pair_key(link.person_pid, link.target_pid);

        let write_txn = self.db.begin_write()?;

        {
            let links_table = write_txn.open_table(LINKS)?;
            if links_table.get(&key)?.is_some() {
                return Err(KindredError::StorageConflict {
                    person: link.person_pid,
                    target: link.target_pid,
                });
            }
        }

        let now = Utc::now();
        let mut stored = link.clone();
        stored.created_at = now;
        stored.updated_at = now;

        let link_bytes = Self::serialize_link(&stored)?;
        {
            let mut links_table = write_txn.open_table(LINKS)?;
            links_table.insert(&key, link_bytes.as_slice())?;
        }

        self.index_link(&write_txn, &stored)?;
        write_txn.commit()?;

        Ok(stored)
    }

    fn save_if_unchanged(&self, link: &Link, expected: &Link) -> Result<Link> {
        let key = Self::pair_key(link.person_pid, link.target_pid);

        let write_txn = self.db.begin_write()?;

        // Writers are serialized, so checking inside the write transaction
        // makes this a compare-and-set against the stored row.
        let current = {
            let links_table = write_txn.open_table(LINKS)?;
            let bytes = links_table.get(&key)?.map(|guard| guard.value().to_vec());
            bytes.map(|b| Self::deserialize_link(&b)).transpose()?
        };

        let current = match current {
            Some(current)
                if current.outcome == expected.outcome
                    && current.source == expected.source
                    && current.updated_at == expected.updated_at =>
            {
                current
            }
            _ => {
                return Err(KindredError::StorageConflict {
                    person: link.person_pid,
                    target: link.target_pid,
                });
            }
        };

        let mut stored = link.clone();
        stored.created_at = current.created_at;
        stored.updated_at = Utc::now();

        let link_bytes = Self::serialize_link(&stored)?;
        {
            let mut links_table = write_txn.open_table(LINKS)?;
            links_table.insert(&key, link_bytes.as_slice())?;
        }

        self.index_link(&write_txn, &stored)?;
        write_txn.commit()?;

        Ok(stored)
    }

    fn delete(&self, link: &Link) -> Result<()> {
        let key = Self::pair_key(link.person_pid, link.target_pid);

        // Own write transaction: the removal commits here, independent of
        // whatever operation asked for it.
        let write_txn = self.db.begin_write()?;

        {
            let mut links_table = write_txn.open_table(LINKS)?;
            links_table.remove(&key)?;
        }

        self.unindex_link(&write_txn, link)?;
        write_txn.commit()?;

        Ok(())
    }

    fn delete_all_referencing(&self, pid: Pid) -> Result<usize> {
        if pid.is_nil() {
            return Err(KindredError::InvalidInput(
                "Purge requires a non-nil pid".into(),
            ));
        }

        let write_txn = self.db.begin_write()?;

        // Collect pair keys from both index sides; a pid may be the person
        // end of some links and the target end of others.
        let keys: BTreeSet<[u8; 32]> = {
            let person_index = write_txn.open_multimap_table(LINKS_BY_PERSON)?;
            let target_index = write_txn.open_multimap_table(LINKS_BY_TARGET)?;

            let mut keys = BTreeSet::new();
            for r in person_index.get(pid.as_bytes())? {
                keys.insert(*r?.value());
            }
            for r in target_index.get(pid.as_bytes())? {
                keys.insert(*r?.value());
            }
            keys
        };

        let mut removed = 0;
        for key in &keys {
            let link = {
                let mut links_table = write_txn.open_table(LINKS)?;
                let bytes = links_table
                    .remove(key)?
                    .map(|guard| guard.value().to_vec());
                bytes.map(|b| Self::deserialize_link(&b)).transpose()?
            };
            if let Some(link) = link {
                self.unindex_link(&write_txn, &link)?;
                removed += 1;
            }
        }

        write_txn.commit()?;
        Ok(removed)
    }

    fn count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let links_table = read_txn.open_table(LINKS)?;
        let mut count = 0u64;
        for item in links_table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LinkSource;
    use tempfile::TempDir;

    fn create_test_store() -> (RedbLinkStore, TempDir) {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("links_test.redb");
        let store = RedbLinkStore::open(&db_path).unwrap();
        (store, temp_dir)
    }

    fn make_link(person: Pid, target: Pid, outcome: MatchOutcome, source: LinkSource) -> Link {
        Link::new(person, target, outcome, source)
    }

    #[test]
    fn test_link_crud() {
        let (store, _temp) = create_test_store();
        let person = Pid::new();
        let target = Pid::new();

        let link = make_link(person, target, MatchOutcome::PossibleMatch, LinkSource::Automatic);
        store.save(&link).unwrap();

        let found = store.find(person, target).unwrap().unwrap();
        assert_eq!(found.outcome, MatchOutcome::PossibleMatch);
        assert_eq!(found.source, LinkSource::Automatic);

        let mut updated = found.clone();
        updated.outcome = MatchOutcome::Match;
        updated.source = LinkSource::Manual;
        store.save(&updated).unwrap();

        let found = store.find(person, target).unwrap().unwrap();
        assert_eq!(found.outcome, MatchOutcome::Match);
        assert_eq!(store.count().unwrap(), 1);

        store.delete(&found).unwrap();
        assert!(store.find(person, target).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_save_preserves_created_at_and_refreshes_updated_at() {
        let (store, _temp) = create_test_store();
        let person = Pid::new();
        let target = Pid::new();

        let link = make_link(person, target, MatchOutcome::PossibleMatch, LinkSource::Automatic);
        let first = store.save(&link).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));

        let mut changed = first.clone();
        changed.outcome = MatchOutcome::Match;
        let second = store.save(&changed).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn test_insert_new_conflicts_on_existing_pair() {
        let (store, _temp) = create_test_store();
        let person = Pid::new();
        let target = Pid::new();

        let link = make_link(person, target, MatchOutcome::PossibleMatch, LinkSource::Automatic);
        store.insert_new(&link).unwrap();

        let rival = make_link(person, target, MatchOutcome::Match, LinkSource::Automatic);
        let err = store.insert_new(&rival).unwrap_err();
        assert!(matches!(err, KindredError::StorageConflict { .. }));

        // The losing insert changed nothing
        let found = store.find(person, target).unwrap().unwrap();
        assert_eq!(found.outcome, MatchOutcome::PossibleMatch);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_save_if_unchanged_detects_interleaved_write() {
        let (store, _temp) = create_test_store();
        let person = Pid::new();
        let target = Pid::new();

        let first = store
            .save(&make_link(person, target, MatchOutcome::PossibleMatch, LinkSource::Automatic))
            .unwrap();

        // Row still matches the snapshot: the conditional update goes through
        let mut upgraded = first.clone();
        upgraded.outcome = MatchOutcome::Match;
        let second = store.save_if_unchanged(&upgraded, &first).unwrap();
        assert_eq!(second.outcome, MatchOutcome::Match);
        assert_eq!(second.created_at, first.created_at);

        // A rival write after the snapshot invalidates it
        let snapshot = second.clone();
        store
            .save(&make_link(person, target, MatchOutcome::NoMatch, LinkSource::Manual))
            .unwrap();
        let err = store.save_if_unchanged(&snapshot, &snapshot).unwrap_err();
        assert!(matches!(err, KindredError::StorageConflict { .. }));

        // The losing write changed nothing
        let stored = store.find(person, target).unwrap().unwrap();
        assert_eq!(stored.outcome, MatchOutcome::NoMatch);
        assert_eq!(stored.source, LinkSource::Manual);

        // A deleted row conflicts too, rather than silently resurrecting
        store.delete(&stored).unwrap();
        let err = store.save_if_unchanged(&stored, &stored).unwrap_err();
        assert!(matches!(err, KindredError::StorageConflict { .. }));
    }

    #[test]
    fn test_open_refuses_mismatched_schema_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("version_test.redb");
        {
            let _store = RedbLinkStore::open(&db_path).unwrap();
        }

        // Bump the stored version behind the store's back
        {
            let db = Database::create(&db_path).unwrap();
            let write_txn = db.begin_write().unwrap();
            {
                let mut meta = write_txn.open_table(META).unwrap();
                meta.insert(SCHEMA_VERSION_KEY, "999".as_bytes()).unwrap();
            }
            write_txn.commit().unwrap();
        }

        let err = RedbLinkStore::open(&db_path).unwrap_err();
        assert!(matches!(err, KindredError::Validation(_)));
    }

    #[test]
    fn test_find_rejects_nil_pids() {
        let (store, _temp) = create_test_store();
        let err = store.find(Pid::nil(), Pid::new()).unwrap_err();
        assert!(matches!(err, KindredError::InvalidInput(_)));

        let err = store.find(Pid::new(), Pid::nil()).unwrap_err();
        assert!(matches!(err, KindredError::InvalidInput(_)));
    }

    #[test]
    fn test_list_queries_return_empty_for_nil_pid() {
        let (store, _temp) = create_test_store();
        assert!(store.find_all_by_person(Pid::nil()).unwrap().is_empty());
        assert!(store.find_all_by_target(Pid::nil()).unwrap().is_empty());
    }

    #[test]
    fn test_either_orientation_lookup() {
        let (store, _temp) = create_test_store();
        let a = Pid::new();
        let b = Pid::new();

        store
            .save(&make_link(b, a, MatchOutcome::NoMatch, LinkSource::Manual))
            .unwrap();

        // Stored as (b, a); a forward probe for (a, b) misses
        assert!(store.find(a, b).unwrap().is_none());

        let found = store.find_either_orientation(a, b).unwrap().unwrap();
        assert_eq!(found.person_pid, b);
        assert_eq!(found.target_pid, a);
    }

    #[test]
    fn test_filtered_queries() {
        let (store, _temp) = create_test_store();
        let person = Pid::new();
        let t1 = Pid::new();
        let t2 = Pid::new();
        let t3 = Pid::new();

        store
            .save(&make_link(person, t1, MatchOutcome::Match, LinkSource::Manual))
            .unwrap();
        store
            .save(&make_link(person, t2, MatchOutcome::PossibleMatch, LinkSource::Automatic))
            .unwrap();
        store
            .save(&make_link(person, t3, MatchOutcome::NoMatch, LinkSource::Manual))
            .unwrap();

        let by_person = store.find_all_by_person(person).unwrap();
        assert_eq!(by_person.len(), 3);

        let by_target = store.find_all_by_target(t2).unwrap();
        assert_eq!(by_target.len(), 1);
        assert_eq!(by_target[0].outcome, MatchOutcome::PossibleMatch);

        let matched = store.find_matched_for_target(t1).unwrap().unwrap();
        assert_eq!(matched.target_pid, t1);
        assert!(store.find_matched_for_target(t2).unwrap().is_none());

        let manual = store
            .find_links(LinkFilter::new().with_person(person).with_source(LinkSource::Manual))
            .unwrap();
        assert_eq!(manual.len(), 2);

        let limited = store
            .find_links(LinkFilter::new().with_person(person).with_limit(2))
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_possible_duplicates_query() {
        let (store, _temp) = create_test_store();
        let p1 = Pid::new();
        let p2 = Pid::new();
        let p3 = Pid::new();

        store
            .save(&make_link(p1, p2, MatchOutcome::PossibleDuplicate, LinkSource::Automatic))
            .unwrap();
        store
            .save(&make_link(p1, p3, MatchOutcome::Match, LinkSource::Automatic))
            .unwrap();

        let duplicates = store.find_all_possible_duplicates().unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].outcome, MatchOutcome::PossibleDuplicate);
    }

    #[test]
    fn test_delete_all_referencing_counts_both_ends() {
        let (store, _temp) = create_test_store();
        let shared = Pid::new();
        let other_person = Pid::new();
        let t1 = Pid::new();
        let t2 = Pid::new();

        // shared is the person end of two links and the target end of one
        store
            .save(&make_link(shared, t1, MatchOutcome::Match, LinkSource::Automatic))
            .unwrap();
        store
            .save(&make_link(shared, t2, MatchOutcome::PossibleMatch, LinkSource::Automatic))
            .unwrap();
        store
            .save(&make_link(other_person, shared, MatchOutcome::PossibleDuplicate, LinkSource::Automatic))
            .unwrap();
        // Unrelated link survives
        store
            .save(&make_link(other_person, t1, MatchOutcome::PossibleMatch, LinkSource::Automatic))
            .unwrap();

        let removed = store.delete_all_referencing(shared).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.find(shared, t1).unwrap().is_none());
        assert!(store.find(other_person, shared).unwrap().is_none());
        assert!(store.find(other_person, t1).unwrap().is_some());

        // Nothing left to purge is a success, not an error
        let removed = store.delete_all_referencing(shared).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_reopen_preserves_links() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("reopen_test.redb");

        let person = Pid::new();
        let target = Pid::new();
        {
            let store = RedbLinkStore::open(&db_path).unwrap();
            store
                .save(&make_link(person, target, MatchOutcome::Match, LinkSource::Manual))
                .unwrap();
        }

        let store = RedbLinkStore::open(&db_path).unwrap();
        let found = store.find(person, target).unwrap().unwrap();
        assert_eq!(found.outcome, MatchOutcome::Match);
        assert_eq!(found.source, LinkSource::Manual);
    }
}
