//! Chain expansion and orchestration.
//!
//! A chain is a root build plus its full transitive snapshot-dependency set.
//! [`expand`] walks that set through a server handle; [`ChainProcessor`] is
//! the public entry point tying access checks, the connection cache, the
//! walk and the aggregation together.

mod processor;
mod walker;

pub use processor::ChainProcessor;
pub use walker::{ChainExpansion, expand};
