use std::sync::Arc;

use tracing::warn;

use crate::interner::StringInterner;
use crate::store::BuildStore;

/// Baseline test-history lookup used to classify failures as new.
///
/// `None` means history is unavailable; callers degrade by treating the
/// failure as new rather than failing the summarization.
#[async_trait::async_trait]
pub trait TestHistory: Send + Sync {
    /// Whether the named test passed or failed on `branch` within the most
    /// recent `lookback` builds.
    async fn seen_on_branch(&self, test: &str, branch: &str, lookback: usize) -> Option<bool>;
}

/// History backed by the server's own build store: scans the most recent
/// baseline-branch builds for an occurrence of the test.
pub struct StoreHistory {
    store: Arc<dyn BuildStore>,
    interner: Arc<StringInterner>,
}

impl StoreHistory {
    pub fn new(store: Arc<dyn BuildStore>, interner: Arc<StringInterner>) -> Self {
        Self { store, interner }
    }
}

impl std::fmt::Debug for StoreHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHistory").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TestHistory for StoreHistory {
    async fn seen_on_branch(&self, test: &str, branch: &str, lookback: usize) -> Option<bool> {
        // A branch never interned has no cached builds at all.
        let branch_code = self.interner.lookup(branch)?;
        let builds = match self.store.builds_on_branch(branch_code, lookback).await {
            Ok(builds) => builds,
            Err(e) => {
                warn!(branch, error = %e, "baseline history unavailable");
                return None;
            }
        };
        if builds.is_empty() {
            return None;
        }
        // Every test name occurring in a record was interned on write, so a
        // name absent from the table cannot occur in any cached build.
        let Some(test_code) = self.interner.lookup(test) else {
            return Some(false);
        };
        Some(
            builds
                .iter()
                .any(|b| b.tests.iter().any(|t| t.name == test_code)),
        )
    }
}

/// History source that knows nothing; every failure classifies as new.
#[derive(Debug, Default)]
pub struct NoHistory;

#[async_trait::async_trait]
impl TestHistory for NoHistory {
    async fn seen_on_branch(&self, _test: &str, _branch: &str, _lookback: usize) -> Option<bool> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BuildId, BuildRecord, STATUS_FAILURE, STATUS_SUCCESS, TestEntry};

    fn baseline_build(
        interner: &StringInterner,
        id: i32,
        branch: &str,
        tests: &[(&str, &str)],
    ) -> BuildRecord {
        BuildRecord {
            id: BuildId(id),
            build_type: interner.intern("Cache1"),
            name: interner.intern("Cache 1"),
            branch: interner.intern(branch),
            status: interner.intern(STATUS_SUCCESS),
            state: interner.intern("finished"),
            start_ts_ms: i64::from(id) * 1000,
            duration_ms: 0,
            dependencies: Vec::new(),
            tests: tests
                .iter()
                .map(|&(name, status)| TestEntry {
                    name: interner.intern(name),
                    status: interner.intern(status),
                    duration_ms: 10,
                    log_size: 0,
                })
                .collect(),
            problems: Vec::new(),
        }
    }

    async fn history_with(builds: Vec<BuildRecord>, interner: Arc<StringInterner>) -> StoreHistory {
        let store = Arc::new(crate::store::MemoryBuildStore::new());
        for build in builds {
            store.put(build).await.unwrap();
        }
        StoreHistory::new(store, interner)
    }

    #[tokio::test]
    async fn known_test_is_seen() {
        let interner = Arc::new(StringInterner::new());
        let builds = vec![
            baseline_build(&interner, 1, "master", &[("T#a", STATUS_SUCCESS)]),
            baseline_build(&interner, 2, "master", &[("T#a", STATUS_FAILURE)]),
        ];
        let history = history_with(builds, Arc::clone(&interner)).await;
        assert_eq!(history.seen_on_branch("T#a", "master", 10).await, Some(true));
    }

    #[tokio::test]
    async fn unknown_test_with_baseline_builds_is_unseen() {
        let interner = Arc::new(StringInterner::new());
        let builds = vec![baseline_build(&interner, 1, "master", &[("T#a", STATUS_SUCCESS)])];
        let history = history_with(builds, Arc::clone(&interner)).await;
        assert_eq!(
            history.seen_on_branch("T#brand_new", "master", 10).await,
            Some(false)
        );
    }

    #[tokio::test]
    async fn empty_baseline_is_unavailable() {
        let interner = Arc::new(StringInterner::new());
        // Branch string interned but no builds cached on it.
        interner.intern("master");
        let history = history_with(vec![], Arc::clone(&interner)).await;
        assert_eq!(history.seen_on_branch("T#a", "master", 10).await, None);
    }

    #[tokio::test]
    async fn unknown_branch_is_unavailable() {
        let interner = Arc::new(StringInterner::new());
        let history = history_with(vec![], Arc::clone(&interner)).await;
        assert_eq!(history.seen_on_branch("T#a", "never-seen", 10).await, None);
    }

    #[tokio::test]
    async fn no_history_always_degrades() {
        assert_eq!(NoHistory.seen_on_branch("T#a", "master", 10).await, None);
    }
}
