//! Link resolution engine: precedence-governed updates to person/target
//! links, duplicate detection, synchronization of the person's denormalized
//! target list, and referential purge.

mod config;
mod dedup;
mod precedence;
mod projector;
mod purge;
mod resolution;


pub use config::{EngineConfig, FaultInjector};
pub use dedup::DuplicateDetector;
pub use precedence::{decide, Decision, AUTO_NO_MATCH_DENIED, MANUAL_LINK_PROTECTED};
pub use projector::project_matches;
pub use resolution::LinkEngine;
