use crate::error::UpstreamError;
use crate::types::BuildId;

use super::raw::{RawBuild, RawProblem, RawTestOccurrence};

/// Fetch interface to one upstream CI server.
///
/// Implementations own retry/backoff; a returned
/// [`UpstreamError::Transient`] means the retry budget is already exhausted.
/// `NotFound` is a normal outcome for dangling build references, not a bug.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch one build by id.
    async fn fetch_build(&self, id: BuildId) -> Result<RawBuild, UpstreamError>;

    /// Fetch all test occurrences of a build. Missing build ⇒ empty list.
    async fn fetch_tests(&self, id: BuildId) -> Result<Vec<RawTestOccurrence>, UpstreamError>;

    /// Fetch all problem occurrences of a build. Missing build ⇒ empty list.
    async fn fetch_problems(&self, id: BuildId) -> Result<Vec<RawProblem>, UpstreamError>;
}
