pub mod types;
pub mod storage;
pub mod error;
pub mod engine;
pub mod resolve;
pub mod api;

pub use error::{KindredError, Result};
pub use types::*;
pub use storage::{LinkFilter, LinkStore, RedbLinkStore, CURRENT_SCHEMA_VERSION};
pub use api::{Kindred, KindredConfig};
pub use engine::{
    decide, Decision, DuplicateDetector, EngineConfig, FaultInjector, LinkEngine,
    AUTO_NO_MATCH_DENIED, MANUAL_LINK_PROTECTED,
};
pub use resolve::{MemoryPersonDirectory, MemoryResolver, PersonDirectory, ReferenceResolver};
