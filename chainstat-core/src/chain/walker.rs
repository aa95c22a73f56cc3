use std::collections::HashSet;

use tracing::debug;

use crate::connect::ServerHandle;
use crate::types::{BuildId, BuildRecord};

/// Result of one chain expansion: the deduplicated build records in
/// deterministic depth-first order (root first), plus the ids that were
/// referenced but could not be fetched from cache or upstream.
#[derive(Debug, Clone)]
pub struct ChainExpansion {
    pub records: Vec<BuildRecord>,
    pub missing: Vec<BuildId>,
}

impl ChainExpansion {
    /// The root record. Expansions are only constructed with at least the
    /// root present.
    pub fn root(&self) -> &BuildRecord {
        &self.records[0]
    }

    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Expand a build chain from its root, following snapshot-dependency ids.
///
/// Iterative work-list walk with a visited set, so diamonds are expanded
/// once and cycles terminate. Dependencies are visited in the order the
/// parent lists them, which keeps tie-breaking in downstream rankings
/// reproducible. A dependency missing from cache and upstream lands in
/// `missing`; a missing root is terminal and yields `Ok(None)`.
pub async fn expand(
    handle: &ServerHandle,
    root: BuildId,
) -> crate::error::Result<Option<ChainExpansion>> {
    let mut visited = HashSet::new();
    let mut stack = vec![root];
    visited.insert(root);

    let mut records = Vec::new();
    let mut missing = Vec::new();

    while let Some(id) = stack.pop() {
        match handle.fat_build(id).await? {
            Some(record) => {
                // Reverse push so the first-listed dependency is expanded
                // first.
                for &dep in record.dependencies.iter().rev() {
                    if visited.insert(dep) {
                        stack.push(dep);
                    }
                }
                records.push(record);
            }
            None if records.is_empty() => {
                debug!(server = %handle.server_code(), root = %root, "chain root not found");
                return Ok(None);
            }
            None => missing.push(id),
        }
    }

    debug!(
        server = %handle.server_code(),
        root = %root,
        builds = records.len(),
        missing = missing.len(),
        "chain expanded"
    );
    Ok(Some(ChainExpansion { records, missing }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::UpstreamError;
    use crate::interner::StringInterner;
    use crate::store::MemoryBuildStore;
    use crate::types::STATUS_SUCCESS;
    use crate::upstream::{RawBuild, RawProblem, RawTestOccurrence, UpstreamClient};

    struct NoUpstream;

    #[async_trait::async_trait]
    impl UpstreamClient for NoUpstream {
        async fn fetch_build(&self, id: BuildId) -> Result<RawBuild, UpstreamError> {
            Err(UpstreamError::NotFound(id.0))
        }
        async fn fetch_tests(&self, _id: BuildId) -> Result<Vec<RawTestOccurrence>, UpstreamError> {
            Ok(Vec::new())
        }
        async fn fetch_problems(&self, _id: BuildId) -> Result<Vec<RawProblem>, UpstreamError> {
            Ok(Vec::new())
        }
    }

    fn record(interner: &StringInterner, id: i32, deps: &[i32]) -> BuildRecord {
        BuildRecord {
            id: BuildId(id),
            build_type: interner.intern(&format!("Suite{id}")),
            name: interner.intern(&format!("Suite {id}")),
            branch: interner.intern("refs/heads/master"),
            status: interner.intern(STATUS_SUCCESS),
            state: interner.intern("finished"),
            start_ts_ms: 0,
            duration_ms: 0,
            dependencies: deps.iter().map(|&d| BuildId(d)).collect(),
            tests: Vec::new(),
            problems: Vec::new(),
        }
    }

    fn empty_handle() -> ServerHandle {
        ServerHandle::new(
            "apache",
            Arc::new(NoUpstream),
            Arc::new(MemoryBuildStore::new()),
            Arc::new(StringInterner::new()),
        )
    }

    async fn handle_with(graph: &[(i32, &[i32])]) -> ServerHandle {
        let handle = empty_handle();
        for &(id, deps) in graph {
            handle
                .store()
                .put(record(handle.interner(), id, deps))
                .await
                .unwrap();
        }
        handle
    }

    fn ids(expansion: &ChainExpansion) -> Vec<i32> {
        expansion.records.iter().map(|r| r.id.0).collect()
    }

    #[tokio::test]
    async fn diamond_visits_shared_dependency_once() {
        let handle = handle_with(&[(1, &[2, 3]), (2, &[4]), (3, &[4]), (4, &[])]).await;

        let expansion = expand(&handle, BuildId(1)).await.unwrap().unwrap();
        assert_eq!(ids(&expansion), vec![1, 2, 4, 3]);
        assert!(!expansion.has_missing());
        assert_eq!(expansion.root().id, BuildId(1));
    }

    #[tokio::test]
    async fn cyclic_graph_terminates() {
        let handle = handle_with(&[(1, &[2]), (2, &[3]), (3, &[1])]).await;

        let expansion = expand(&handle, BuildId(1)).await.unwrap().unwrap();
        assert_eq!(ids(&expansion), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_dependency_is_flagged_not_fatal() {
        let handle = handle_with(&[(1, &[2, 99]), (2, &[])]).await;

        let expansion = expand(&handle, BuildId(1)).await.unwrap().unwrap();
        assert_eq!(ids(&expansion), vec![1, 2]);
        assert_eq!(expansion.missing, vec![BuildId(99)]);
        assert!(expansion.has_missing());
    }

    #[tokio::test]
    async fn missing_root_is_terminal() {
        let handle = empty_handle();
        let expansion = expand(&handle, BuildId(42)).await.unwrap();
        assert!(expansion.is_none());
    }

    #[tokio::test]
    async fn depth_first_order_is_deterministic() {
        let graph: &[(i32, &[i32])] = &[
            (10, &[20, 30]),
            (20, &[21, 22]),
            (21, &[]),
            (22, &[]),
            (30, &[]),
        ];
        let first = expand(&handle_with(graph).await, BuildId(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&first), vec![10, 20, 21, 22, 30]);

        let second = expand(&handle_with(graph).await, BuildId(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&first), ids(&second));
    }
}
