use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{ChainstatError, StoreError};
use crate::types::{BuildId, BuildRecord, StrCode};

use super::BuildStore;

/// In-memory build store. The default medium for per-connection caches and
/// the fixture store in tests.
#[derive(Debug, Default)]
pub struct MemoryBuildStore {
    builds: RwLock<HashMap<BuildId, BuildRecord>>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BuildStore for MemoryBuildStore {
    async fn get(&self, id: BuildId) -> crate::error::Result<Option<BuildRecord>> {
        Ok(self
            .builds
            .read()
            .expect("build store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn put(&self, record: BuildRecord) -> crate::error::Result<()> {
        let mut builds = self.builds.write().expect("build store lock poisoned");
        match builds.get(&record.id) {
            Some(existing) if *existing != record => Err(ChainstatError::Store(
                StoreError::Conflict {
                    build_id: record.id.0,
                },
            )),
            Some(_) => Ok(()),
            None => {
                builds.insert(record.id, record);
                Ok(())
            }
        }
    }

    async fn builds_on_branch(
        &self,
        branch: StrCode,
        limit: usize,
    ) -> crate::error::Result<Vec<BuildRecord>> {
        let builds = self.builds.read().expect("build store lock poisoned");
        let mut matched: Vec<BuildRecord> = builds
            .values()
            .filter(|b| b.branch == branch)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.start_ts_ms.cmp(&a.start_ts_ms).then(b.id.cmp(&a.id)));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn count(&self) -> crate::error::Result<u64> {
        Ok(self.builds.read().expect("build store lock poisoned").len() as u64)
    }
}
