//! Upstream CI server access: raw REST DTOs and the fetch client.
//!
//! The client applies its own retry/backoff for transient failures; callers
//! only ever see the final `NotFound` / `Transient` outcome per entity.

pub mod raw;
pub mod rest;
mod traits;

pub use raw::{RawBuild, RawProblem, RawTestOccurrence};
pub use rest::RestClient;
pub use traits::UpstreamClient;
