//! Build store: content-addressed cache of finished builds.
//!
//! Once a finished build is stored it is never re-fetched from upstream and
//! never mutated in place; a conflicting re-insert for the same id is a data
//! integrity violation and fails with [`crate::error::StoreError::Conflict`].

mod memory;
pub mod schema;
pub mod sqlite;
mod traits;

pub use memory::MemoryBuildStore;
pub use sqlite::SqliteBuildStore;
pub use traits::BuildStore;
