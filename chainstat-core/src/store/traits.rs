use crate::types::{BuildId, BuildRecord, StrCode};

/// The build-store abstraction. The walker and aggregator read through this
/// trait; the server handle writes through it while assembling records.
#[async_trait::async_trait]
pub trait BuildStore: Send + Sync {
    /// Get a cached build record by id.
    async fn get(&self, id: BuildId) -> crate::error::Result<Option<BuildRecord>>;

    /// Insert a finished build record.
    ///
    /// Idempotent for identical records; fails with `Conflict` when a
    /// different record already exists under the same id.
    async fn put(&self, record: BuildRecord) -> crate::error::Result<()>;

    /// Most recent builds on a branch, newest first, up to `limit`.
    /// Used by the baseline-history lookup.
    async fn builds_on_branch(
        &self,
        branch: StrCode,
        limit: usize,
    ) -> crate::error::Result<Vec<BuildRecord>>;

    /// Number of cached records.
    async fn count(&self) -> crate::error::Result<u64>;
}
