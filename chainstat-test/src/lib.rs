// Integration test fixtures for chainstat: a scripted upstream server, a
// handle factory over it, and helpers for seeding baseline history.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chainstat_core::config::{BotConfig, CacheSection, ServerConfig};
use chainstat_core::connect::{HandleFactory, ServerHandle};
use chainstat_core::creds::CredentialsProvider;
use chainstat_core::error::UpstreamError;
use chainstat_core::interner::StringInterner;
use chainstat_core::store::{BuildStore, MemoryBuildStore};
use chainstat_core::types::{
    BuildId, BuildRecord, STATE_FINISHED, STATUS_FAILURE, STATUS_SUCCESS, TestEntry,
};
use chainstat_core::upstream::{RawBuild, RawProblem, RawTestOccurrence, UpstreamClient};

/// One scripted upstream build, assembled with the builder methods.
#[derive(Debug, Clone)]
pub struct FixtureBuild {
    pub raw: RawBuild,
    pub tests: Vec<RawTestOccurrence>,
    pub problems: Vec<RawProblem>,
}

impl FixtureBuild {
    pub fn new(id: i32, build_type: &str, name: &str) -> Self {
        Self {
            raw: RawBuild {
                id,
                build_type_id: build_type.to_string(),
                build_type: Some(chainstat_core::upstream::raw::RawBuildType {
                    name: Some(name.to_string()),
                }),
                branch_name: Some("pull/4931/head".to_string()),
                status: Some(STATUS_SUCCESS.to_string()),
                state: Some(STATE_FINISHED.to_string()),
                start_date: Some("20190205T201633+0300".to_string()),
                finish_date: Some("20190205T211633+0300".to_string()),
                snapshot_dependencies: None,
            },
            tests: Vec::new(),
            problems: Vec::new(),
        }
    }

    pub fn branch(mut self, branch: &str) -> Self {
        self.raw.branch_name = Some(branch.to_string());
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.raw.status = Some(status.to_string());
        self
    }

    pub fn deps(mut self, ids: &[i32]) -> Self {
        self.raw.snapshot_dependencies = Some(chainstat_core::upstream::raw::RawBuildRefs {
            build: ids
                .iter()
                .map(|&id| chainstat_core::upstream::raw::RawBuildRef { id })
                .collect(),
        });
        self
    }

    pub fn test(mut self, name: &str, status: &str, duration_ms: i64, log_size: i64) -> Self {
        self.tests.push(RawTestOccurrence {
            name: name.to_string(),
            status: Some(status.to_string()),
            duration: duration_ms,
            log_size,
        });
        self
    }

    pub fn problem(mut self, problem_type: &str) -> Self {
        self.problems.push(RawProblem {
            problem_type: problem_type.to_string(),
        });
        self
    }
}

/// Scripted upstream CI server: serves the registered builds and counts
/// fetches, so tests can assert that cached builds are never re-fetched.
#[derive(Debug, Default)]
pub struct ScriptedUpstream {
    builds: HashMap<i32, FixtureBuild>,
    build_fetches: AtomicU32,
}

impl ScriptedUpstream {
    pub fn new(builds: impl IntoIterator<Item = FixtureBuild>) -> Self {
        Self {
            builds: builds.into_iter().map(|b| (b.raw.id, b)).collect(),
            build_fetches: AtomicU32::new(0),
        }
    }

    /// Number of `fetch_build` calls served so far.
    pub fn build_fetches(&self) -> u32 {
        self.build_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn fetch_build(&self, id: BuildId) -> Result<RawBuild, UpstreamError> {
        self.build_fetches.fetch_add(1, Ordering::SeqCst);
        self.builds
            .get(&id.0)
            .map(|b| b.raw.clone())
            .ok_or(UpstreamError::NotFound(id.0))
    }

    async fn fetch_tests(&self, id: BuildId) -> Result<Vec<RawTestOccurrence>, UpstreamError> {
        Ok(self
            .builds
            .get(&id.0)
            .map(|b| b.tests.clone())
            .unwrap_or_default())
    }

    async fn fetch_problems(&self, id: BuildId) -> Result<Vec<RawProblem>, UpstreamError> {
        Ok(self
            .builds
            .get(&id.0)
            .map(|b| b.problems.clone())
            .unwrap_or_default())
    }
}

/// A fully wired test server: scripted upstream, shared in-memory store and
/// interner, plus a [`HandleFactory`] handing out handles over them.
#[derive(Debug)]
pub struct ChainFixture {
    pub upstream: Arc<ScriptedUpstream>,
    pub store: Arc<MemoryBuildStore>,
    pub interner: Arc<StringInterner>,
}

impl ChainFixture {
    pub fn new(builds: impl IntoIterator<Item = FixtureBuild>) -> Self {
        Self {
            upstream: Arc::new(ScriptedUpstream::new(builds)),
            store: Arc::new(MemoryBuildStore::new()),
            interner: Arc::new(StringInterner::new()),
        }
    }

    /// A standalone handle over the fixture's shared parts.
    pub fn handle(&self, server_code: &str) -> ServerHandle {
        ServerHandle::new(
            server_code,
            Arc::clone(&self.upstream) as Arc<dyn UpstreamClient>,
            Arc::clone(&self.store) as Arc<dyn BuildStore>,
            Arc::clone(&self.interner),
        )
    }

    /// Factory for use with a `ConnectionCache`; every opened handle shares
    /// the fixture's upstream, store and interner.
    pub fn factory(&self) -> Arc<dyn HandleFactory> {
        Arc::new(FixtureFactory {
            upstream: Arc::clone(&self.upstream),
            store: Arc::clone(&self.store),
            interner: Arc::clone(&self.interner),
        })
    }

    /// Configuration declaring one server `apache` with defaults.
    pub fn config() -> BotConfig {
        BotConfig {
            primary_server: Some("apache".to_string()),
            servers: vec![ServerConfig {
                code: "apache".to_string(),
                url: "https://ci.example.org".to_string(),
                reference: None,
                access_reference: None,
                token_env: None,
            }],
            cache: CacheSection::default(),
            aggregation: chainstat_core::config::AggregationSection::default(),
        }
    }

    /// Seed `count` finished baseline builds on `branch`, each running the
    /// given tests. Mirrors the history the aggregator's new-failure
    /// classification scans.
    pub async fn seed_history(&self, branch: &str, count: usize, tests: &[(&str, &str)]) {
        for n in 0..count {
            let id = 100_000 + i32::try_from(n).expect("fixture count fits i32");
            let record = BuildRecord {
                id: BuildId(id),
                build_type: self.interner.intern("IgniteTests_RunAll"),
                name: self.interner.intern("Run :: All"),
                branch: self.interner.intern(branch),
                status: self.interner.intern(STATUS_FAILURE),
                state: self.interner.intern(STATE_FINISHED),
                start_ts_ms: i64::try_from(n).expect("fits") * 60_000,
                duration_ms: 60_000,
                dependencies: Vec::new(),
                tests: tests
                    .iter()
                    .map(|&(name, status)| TestEntry {
                        name: self.interner.intern(name),
                        status: self.interner.intern(status),
                        duration_ms: 10,
                        log_size: 0,
                    })
                    .collect(),
                problems: Vec::new(),
            };
            self.store.put(record).await.expect("seed history");
        }
    }
}

struct FixtureFactory {
    upstream: Arc<ScriptedUpstream>,
    store: Arc<MemoryBuildStore>,
    interner: Arc<StringInterner>,
}

#[async_trait::async_trait]
impl HandleFactory for FixtureFactory {
    async fn open(
        &self,
        server_code: &str,
        _creds: Arc<dyn CredentialsProvider>,
    ) -> chainstat_core::error::Result<ServerHandle> {
        Ok(ServerHandle::new(
            server_code,
            Arc::clone(&self.upstream) as Arc<dyn UpstreamClient>,
            Arc::clone(&self.store) as Arc<dyn BuildStore>,
            Arc::clone(&self.interner),
        ))
    }
}

/// Credentials with a fixed user and a switch for access checks.
#[derive(Debug)]
pub struct TestCreds {
    pub user: String,
    pub allowed: bool,
}

impl TestCreds {
    pub fn allowing(user: &str) -> Arc<Self> {
        Arc::new(Self {
            user: user.to_string(),
            allowed: true,
        })
    }

    pub fn denying(user: &str) -> Arc<Self> {
        Arc::new(Self {
            user: user.to_string(),
            allowed: false,
        })
    }
}

impl CredentialsProvider for TestCreds {
    fn user(&self, _server_code: &str) -> Option<String> {
        (!self.user.is_empty()).then(|| self.user.clone())
    }

    fn token(&self, _server_code: &str) -> Option<String> {
        None
    }

    fn has_access(&self, _access_key: &str) -> bool {
        self.allowed
    }
}
