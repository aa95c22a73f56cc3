use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::{ChainstatError, StoreError};
use crate::interner::StringInterner;
use crate::types::{BuildId, BuildRecord, StrCode, TestEntry};

use super::BuildStore;
use super::schema;

/// SQLite-backed build store.
///
/// Rows carry resolved strings so the database survives restarts; the compact
/// code-based [`BuildRecord`] form is reconstructed on read against the
/// store's interner.
#[derive(Debug)]
pub struct SqliteBuildStore {
    conn: Mutex<Connection>,
    interner: Arc<StringInterner>,
    db_path: Option<PathBuf>,
}

impl SqliteBuildStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path, interner: Arc<StringInterner>) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            interner,
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(interner: Arc<StringInterner>) -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            interner,
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("build store mutex poisoned");

        // Performance pragmas (WAL is silently ignored for in-memory)
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;",
        )
        .map_err(StoreError::Sqlite)?;
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO chainstat_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    fn encode(&self, record: &BuildRecord) -> crate::error::Result<StoredBuild> {
        let resolve = |code: StrCode| {
            self.interner
                .resolve(code)
                .map_err(ChainstatError::Intern)
        };
        Ok(StoredBuild {
            id: record.id.0,
            build_type: resolve(record.build_type)?,
            name: resolve(record.name)?,
            branch: resolve(record.branch)?,
            status: resolve(record.status)?,
            state: resolve(record.state)?,
            start_ts_ms: record.start_ts_ms,
            duration_ms: record.duration_ms,
            dependencies: record.dependencies.iter().map(|d| d.0).collect(),
            tests: record
                .tests
                .iter()
                .map(|t| {
                    Ok(StoredTest {
                        name: resolve(t.name)?,
                        status: resolve(t.status)?,
                        duration_ms: t.duration_ms,
                        log_size: t.log_size,
                    })
                })
                .collect::<crate::error::Result<Vec<_>>>()?,
            problems: record
                .problems
                .iter()
                .map(|&p| resolve(p))
                .collect::<crate::error::Result<Vec<_>>>()?,
        })
    }

    fn decode(&self, stored: StoredBuild) -> BuildRecord {
        BuildRecord {
            id: BuildId(stored.id),
            build_type: self.interner.intern(&stored.build_type),
            name: self.interner.intern(&stored.name),
            branch: self.interner.intern(&stored.branch),
            status: self.interner.intern(&stored.status),
            state: self.interner.intern(&stored.state),
            start_ts_ms: stored.start_ts_ms,
            duration_ms: stored.duration_ms,
            dependencies: stored.dependencies.into_iter().map(BuildId).collect(),
            tests: stored
                .tests
                .into_iter()
                .map(|t| TestEntry {
                    name: self.interner.intern(&t.name),
                    status: self.interner.intern(&t.status),
                    duration_ms: t.duration_ms,
                    log_size: t.log_size,
                })
                .collect(),
            problems: stored
                .problems
                .into_iter()
                .map(|p| self.interner.intern(&p))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl BuildStore for SqliteBuildStore {
    async fn get(&self, id: BuildId) -> crate::error::Result<Option<BuildRecord>> {
        let payload: Option<String> = {
            let conn = self.conn.lock().expect("build store mutex poisoned");
            conn.query_row(
                "SELECT payload FROM builds WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?
        };
        match payload {
            Some(json) => {
                let stored: StoredBuild =
                    serde_json::from_str(&json).map_err(StoreError::Serialization)?;
                Ok(Some(self.decode(stored)))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, record: BuildRecord) -> crate::error::Result<()> {
        let stored = self.encode(&record)?;
        let json = serde_json::to_string(&stored).map_err(StoreError::Serialization)?;

        let conn = self.conn.lock().expect("build store mutex poisoned");
        let existing: Option<String> = conn
            .query_row(
                "SELECT payload FROM builds WHERE id = ?1",
                params![record.id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;

        if let Some(existing_json) = existing {
            let existing_stored: StoredBuild =
                serde_json::from_str(&existing_json).map_err(StoreError::Serialization)?;
            if existing_stored == stored {
                return Ok(());
            }
            return Err(ChainstatError::Store(StoreError::Conflict {
                build_id: record.id.0,
            }));
        }

        conn.execute(
            "INSERT INTO builds (id, branch, start_ts_ms, payload) VALUES (?1, ?2, ?3, ?4)",
            params![record.id.0, stored.branch, record.start_ts_ms, json],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn builds_on_branch(
        &self,
        branch: StrCode,
        limit: usize,
    ) -> crate::error::Result<Vec<BuildRecord>> {
        let branch_name = self.interner.resolve(branch)?;
        let payloads: Vec<String> = {
            let conn = self.conn.lock().expect("build store mutex poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT payload FROM builds WHERE branch = ?1
                     ORDER BY start_ts_ms DESC, id DESC LIMIT ?2",
                )
                .map_err(StoreError::Sqlite)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(params![branch_name, limit], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(StoreError::Sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::Sqlite)?
        };
        payloads
            .into_iter()
            .map(|json| {
                let stored: StoredBuild =
                    serde_json::from_str(&json).map_err(StoreError::Serialization)?;
                Ok(self.decode(stored))
            })
            .collect()
    }

    async fn count(&self) -> crate::error::Result<u64> {
        let conn = self.conn.lock().expect("build store mutex poisoned");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM builds", [], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ── Durable row form ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredBuild {
    id: i32,
    build_type: String,
    name: String,
    branch: String,
    status: String,
    state: String,
    start_ts_ms: i64,
    duration_ms: i64,
    dependencies: Vec<i32>,
    tests: Vec<StoredTest>,
    problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredTest {
    name: String,
    status: String,
    duration_ms: i64,
    log_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{STATUS_FAILURE, STATUS_SUCCESS, STATE_FINISHED};

    fn store() -> (Arc<StringInterner>, SqliteBuildStore) {
        let interner = Arc::new(StringInterner::new());
        let store = SqliteBuildStore::in_memory(Arc::clone(&interner)).unwrap();
        (interner, store)
    }

    fn record(interner: &StringInterner, id: i32, branch: &str, start_ts_ms: i64) -> BuildRecord {
        BuildRecord {
            id: BuildId(id),
            build_type: interner.intern("RunAll"),
            name: interner.intern("Run All"),
            branch: interner.intern(branch),
            status: interner.intern(STATUS_FAILURE),
            state: interner.intern(STATE_FINISHED),
            start_ts_ms,
            duration_ms: 90_000,
            dependencies: vec![BuildId(id + 1)],
            tests: vec![TestEntry {
                name: interner.intern("SomeSuite#testA"),
                status: interner.intern(STATUS_SUCCESS),
                duration_ms: 450,
                log_size: 128,
            }],
            problems: vec![interner.intern("TC_EXIT_CODE")],
        }
    }

    #[tokio::test]
    async fn roundtrip_preserves_record() {
        let (interner, store) = store();
        let rec = record(&interner, 100, "refs/heads/master", 1_000);
        store.put(rec.clone()).await.unwrap();
        let got = store.get(BuildId(100)).await.unwrap().unwrap();
        assert_eq!(got, rec);
    }

    #[tokio::test]
    async fn missing_id_is_none() {
        let (_interner, store) = store();
        assert!(store.get(BuildId(404)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflict_on_differing_record() {
        let (interner, store) = store();
        store
            .put(record(&interner, 1, "refs/heads/master", 500))
            .await
            .unwrap();
        // Same id, different start time.
        let err = store
            .put(record(&interner, 1, "refs/heads/master", 501))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChainstatError::Store(StoreError::Conflict { build_id: 1 })
        ));
    }

    #[tokio::test]
    async fn identical_put_is_idempotent() {
        let (interner, store) = store();
        let rec = record(&interner, 1, "refs/heads/master", 500);
        store.put(rec.clone()).await.unwrap();
        store.put(rec).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn branch_scan_is_ordered_and_bounded() {
        let (interner, store) = store();
        for i in 0..5 {
            store
                .put(record(&interner, i, "refs/heads/master", i64::from(i) * 10))
                .await
                .unwrap();
        }
        store
            .put(record(&interner, 99, "pull/1/head", 1_000))
            .await
            .unwrap();

        let master = interner.intern("refs/heads/master");
        let recent = store.builds_on_branch(master, 3).await.unwrap();
        assert_eq!(
            recent.iter().map(|b| b.id.0).collect::<Vec<_>>(),
            vec![4, 3, 2]
        );
    }

    #[tokio::test]
    async fn survives_reopen_with_fresh_interner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("builds.db");

        let interner = Arc::new(StringInterner::new());
        let store = SqliteBuildStore::open(&path, Arc::clone(&interner)).unwrap();
        store
            .put(record(&interner, 7, "refs/heads/master", 123))
            .await
            .unwrap();
        drop(store);

        // New process: empty interner, same database.
        let interner2 = Arc::new(StringInterner::new());
        let store2 = SqliteBuildStore::open(&path, Arc::clone(&interner2)).unwrap();
        let got = store2.get(BuildId(7)).await.unwrap().unwrap();
        assert_eq!(interner2.resolve(got.status).unwrap(), STATUS_FAILURE);
        assert_eq!(got.start_ts_ms, 123);
    }
}
