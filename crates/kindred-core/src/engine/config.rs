use crate::error::Result;
use crate::types::Link;
use std::sync::Arc;

/// Test seam for injecting storage faults at the moment a link is about to
/// be persisted.
///
/// Passed explicitly through the engine's configuration instead of living in
/// a process-wide static, so each test owns its own failure schedule.
pub trait FaultInjector: Send + Sync {
    /// Runs immediately before the engine persists a link. Returning an
    /// error aborts the update as if the store had failed.
    fn before_save(&self, link: &Link) -> Result<()>;
}

/// Configuration for the link resolution engine
#[derive(Clone)]
pub struct EngineConfig {
    /// Extra read-decide-write attempts after a `StorageConflict` on the
    /// same pair. Default: 1 — the loser of an insert race retries as an
    /// update once, then the conflict surfaces.
    pub conflict_retries: u32,

    /// Optional fault-injection hook for tests.
    pub faults: Option<Arc<dyn FaultInjector>>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("conflict_retries", &self.conflict_retries)
            .field("faults", &self.faults.is_some())
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 1,
            faults: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_fault_injector(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }
}
