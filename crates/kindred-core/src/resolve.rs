//! Collaborator seams: reference resolution and canonical-person persistence.
//!
//! The engine never stores arbitrary clinical resources itself. It consumes
//! two narrow interfaces from the surrounding system: a way to map an
//! external record reference onto a stable pid, and a way to load/persist a
//! person record's denormalized link-target list. The in-memory
//! implementations below back the embedded library mode and the test suite.

use crate::error::{KindredError, Result};
use crate::types::{PersonRecord, Pid, RecordRef};
use std::collections::HashMap;
use std::sync::RwLock;

/// Maps external record references to stable internal pids.
pub trait ReferenceResolver: Send + Sync {
    /// Resolve a reference to its pid, or `None` when no persisted record
    /// carries that reference.
    fn resolve(&self, reference: &RecordRef) -> Result<Option<Pid>>;
}

/// Loads and persists canonical person records.
///
/// The projector mutates a person's `link_targets` and hands the record back
/// through `persist`; everything else about the person record belongs to the
/// surrounding system.
pub trait PersonDirectory: Send + Sync {
    fn load(&self, pid: Pid) -> Result<Option<PersonRecord>>;

    fn persist(&self, person: &PersonRecord) -> Result<()>;
}

/// In-memory resolver for embedded use. Callers register references up
/// front and get the assigned pid back.
#[derive(Default)]
pub struct MemoryResolver {
    refs: RwLock<HashMap<RecordRef, Pid>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference, minting a pid on first sight.
    pub fn register(&self, reference: RecordRef) -> Result<Pid> {
        let mut refs = self
            .refs
            .write()
            .map_err(|_| KindredError::Validation("Resolver lock poisoned".into()))?;
        Ok(*refs.entry(reference).or_insert_with(Pid::new))
    }
}

impl ReferenceResolver for MemoryResolver {
    fn resolve(&self, reference: &RecordRef) -> Result<Option<Pid>> {
        let refs = self
            .refs
            .read()
            .map_err(|_| KindredError::Validation("Resolver lock poisoned".into()))?;
        Ok(refs.get(reference).copied())
    }
}

/// In-memory person directory for embedded use.
#[derive(Default)]
pub struct MemoryPersonDirectory {
    persons: RwLock<HashMap<Pid, PersonRecord>>,
}

impl MemoryPersonDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an empty person record exists for the pid. Existing records
    /// keep their target list.
    pub fn register(&self, pid: Pid) -> Result<()> {
        let mut persons = self
            .persons
            .write()
            .map_err(|_| KindredError::Validation("Person directory lock poisoned".into()))?;
        persons.entry(pid).or_insert_with(|| PersonRecord::new(pid));
        Ok(())
    }
}

impl PersonDirectory for MemoryPersonDirectory {
    fn load(&self, pid: Pid) -> Result<Option<PersonRecord>> {
        let persons = self
            .persons
            .read()
            .map_err(|_| KindredError::Validation("Person directory lock poisoned".into()))?;
        Ok(persons.get(&pid).cloned())
    }

    fn persist(&self, person: &PersonRecord) -> Result<()> {
        let mut persons = self
            .persons
            .write()
            .map_err(|_| KindredError::Validation("Person directory lock poisoned".into()))?;
        persons.insert(person.pid, person.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_per_reference() {
        let resolver = MemoryResolver::new();
        let first = resolver.register(RecordRef::new("Patient/1")).unwrap();
        let second = resolver.register(RecordRef::new("Patient/1")).unwrap();
        assert_eq!(first, second);

        let other = resolver.register(RecordRef::new("Patient/2")).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_unregistered_reference_resolves_to_none() {
        let resolver = MemoryResolver::new();
        let resolved = resolver.resolve(&RecordRef::new("Patient/404")).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn test_person_round_trip() {
        let directory = MemoryPersonDirectory::new();
        let pid = Pid::new();
        directory.register(pid).unwrap();

        let mut person = directory.load(pid).unwrap().unwrap();
        assert!(person.link_targets.is_empty());

        person.link_targets.push(Pid::new());
        directory.persist(&person).unwrap();

        let reloaded = directory.load(pid).unwrap().unwrap();
        assert_eq!(reloaded.link_targets.len(), 1);

        // Re-registering must not wipe the target list
        directory.register(pid).unwrap();
        assert_eq!(directory.load(pid).unwrap().unwrap().link_targets.len(), 1);
    }
}
