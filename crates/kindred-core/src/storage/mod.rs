//! Link persistence: the `LinkStore` contract, the explicit filter struct,
//! and the redb-backed implementation.

mod filters;
mod redb_store;
mod traits;

pub use filters::LinkFilter;
pub use redb_store::{RedbLinkStore, CURRENT_SCHEMA_VERSION};
pub use traits::LinkStore;
