use serde::{Deserialize, Serialize};

use crate::interner::StringInterner;

// ── Typed ID wrappers ──────────────────────────────────────────────

macro_rules! typed_id {
    ($name:ident, $repr:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $repr);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(id: $repr) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(BuildId, i32);
typed_id!(StrCode, u32);

// ── Well-known upstream strings ────────────────────────────────────

/// Build finished without failures.
pub const STATUS_SUCCESS: &str = "SUCCESS";
/// Build finished with failures.
pub const STATUS_FAILURE: &str = "FAILURE";
/// Cancelled or otherwise indeterminate build result.
pub const STATUS_UNKNOWN: &str = "UNKNOWN";
/// Build state for completed builds. Only finished builds are persisted.
pub const STATE_FINISHED: &str = "finished";

/// Suite exceeded its execution time limit.
pub const PROBLEM_EXECUTION_TIMEOUT: &str = "TC_EXECUTION_TIMEOUT";
/// The JVM running the suite crashed.
pub const PROBLEM_JVM_CRASH: &str = "TC_JVM_CRASH";
/// The suite ran out of memory.
pub const PROBLEM_OOME: &str = "TC_OOME";
/// The build process exited with a non-zero code.
pub const PROBLEM_EXIT_CODE: &str = "TC_EXIT_CODE";
/// Synthetic problem the server attaches when tests failed.
pub const PROBLEM_FAILED_TESTS: &str = "TC_FAILED_TESTS";
/// Synthetic problem for a failed snapshot dependency.
pub const PROBLEM_SNAPSHOT_DEPENDENCY: &str = "SNAPSHOT_DEPENDENCY_ERROR";
/// Compilation failed.
pub const PROBLEM_COMPILATION: &str = "TC_COMPILATION_ERROR";

/// Codes for the well-known strings, pre-interned once per server handle so
/// hot paths compare integers instead of strings.
#[derive(Debug, Clone, Copy)]
pub struct KnownCodes {
    pub success: StrCode,
    pub failure: StrCode,
    pub unknown: StrCode,
    pub finished: StrCode,
    pub execution_timeout: StrCode,
    pub jvm_crash: StrCode,
    pub oome: StrCode,
    pub exit_code: StrCode,
    pub failed_tests: StrCode,
    pub snapshot_dependency: StrCode,
}

impl KnownCodes {
    pub fn intern(interner: &StringInterner) -> Self {
        Self {
            success: interner.intern(STATUS_SUCCESS),
            failure: interner.intern(STATUS_FAILURE),
            unknown: interner.intern(STATUS_UNKNOWN),
            finished: interner.intern(STATE_FINISHED),
            execution_timeout: interner.intern(PROBLEM_EXECUTION_TIMEOUT),
            jvm_crash: interner.intern(PROBLEM_JVM_CRASH),
            oome: interner.intern(PROBLEM_OOME),
            exit_code: interner.intern(PROBLEM_EXIT_CODE),
            failed_tests: interner.intern(PROBLEM_FAILED_TESTS),
            snapshot_dependency: interner.intern(PROBLEM_SNAPSHOT_DEPENDENCY),
        }
    }

    /// Problem types that mark a suite as failed-to-finish. Test failures and
    /// snapshot-dependency propagation are excluded: those describe *what*
    /// failed downstream, not an inability of this build to complete.
    pub fn is_critical_problem(&self, problem: StrCode) -> bool {
        problem != self.failed_tests && problem != self.snapshot_dependency
    }
}

// ── Compact build record ───────────────────────────────────────────

/// One test occurrence inside a build, fully interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntry {
    /// Interned full test name.
    pub name: StrCode,
    /// Interned status string (`SUCCESS` / `FAILURE` / ...).
    pub status: StrCode,
    /// Test duration in milliseconds.
    pub duration_ms: i64,
    /// Bytes of log output attributed to this test.
    pub log_size: i64,
}

/// Dense representation of one upstream build.
///
/// All free-form strings are stored as [`StrCode`]s against the owning
/// server handle's interner. Once persisted, a record for a given id is
/// immutable — a build does not change its history after completion; a new
/// attempt gets a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Externally assigned unique build id.
    pub id: BuildId,
    /// Interned build type id (suite id).
    pub build_type: StrCode,
    /// Interned human-readable suite name.
    pub name: StrCode,
    /// Interned branch name.
    pub branch: StrCode,
    /// Interned status string.
    pub status: StrCode,
    /// Interned state string.
    pub state: StrCode,
    /// Start timestamp, milliseconds since the Unix epoch.
    pub start_ts_ms: i64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
    /// Ordered snapshot-dependency build ids (possibly empty).
    pub dependencies: Vec<BuildId>,
    /// Test occurrences.
    pub tests: Vec<TestEntry>,
    /// Interned problem type codes.
    pub problems: Vec<StrCode>,
}

impl BuildRecord {
    pub fn is_success(&self, codes: &KnownCodes) -> bool {
        self.status == codes.success
    }

    /// Cancelled builds surface as status UNKNOWN upstream.
    pub fn is_cancelled(&self, codes: &KnownCodes) -> bool {
        self.status == codes.unknown
    }

    /// Whether this build failed to finish on its own: non-success status
    /// plus at least one problem that is not a test-failure or
    /// snapshot-dependency marker.
    pub fn failed_to_finish(&self, codes: &KnownCodes) -> bool {
        !self.is_success(codes)
            && self
                .problems
                .iter()
                .any(|&p| codes.is_critical_problem(p))
    }

    /// Append test entries while assembling the record from upstream data.
    /// Not valid after the record has been stored.
    pub fn add_tests(&mut self, tests: impl IntoIterator<Item = TestEntry>) -> &mut Self {
        self.tests.extend(tests);
        self
    }

    /// Append problem codes while assembling the record from upstream data.
    pub fn add_problems(&mut self, problems: impl IntoIterator<Item = StrCode>) -> &mut Self {
        self.problems.extend(problems);
        self
    }
}

// ── Aggregated chain status ────────────────────────────────────────

/// Per-problem-type counters over a chain.
///
/// `total` is deliberately the sum of the four named counters only —
/// unclassified problem types are excluded, matching the "known risk
/// categories" semantics of the upstream bot. Generalizing this would change
/// user-visible numbers; see DESIGN.md.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemCounts {
    pub execution_timeout: u64,
    pub jvm_crash: u64,
    pub oome: u64,
    pub exit_code: u64,
    pub total: u64,
}

impl ProblemCounts {
    /// Short-name map as rendered by the presentation layer
    /// (ET / JC / OO / EC / TT).
    pub fn short_names(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("ET", self.execution_timeout),
            ("JC", self.jvm_crash),
            ("OO", self.oome),
            ("EC", self.exit_code),
            ("TT", self.total),
        ]
    }
}

/// One entry of a top-K ranking (slowest test or heaviest log producer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRank {
    /// Suite the test belongs to.
    pub suite: String,
    /// Full test name.
    pub test: String,
    /// Ranking value: average duration in ms, or log bytes.
    pub value: i64,
}

/// A failed test with its baseline classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Full test name.
    pub name: String,
    /// True when the test has no passing-or-failing history on the baseline
    /// branch within the lookback window (or history was unavailable).
    pub new_failure: bool,
}

/// Status of one non-successful suite inside the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteStatus {
    /// Suite (build type) name.
    pub suite: String,
    /// Raw status string.
    pub status: String,
    /// Whether the suite failed to finish (critical build problem present).
    pub failed_to_finish: bool,
    /// Failed tests in this suite.
    pub test_failures: Vec<TestFailure>,
}

/// Derived summary of one build chain on one branch. Computed fresh per
/// request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedChainStatus {
    /// Root build of the chain.
    pub root_id: BuildId,
    /// Branch the chain ran on.
    pub branch: String,
    /// Count of failing test entries across dependency builds.
    pub failed_tests: u64,
    /// Count of suites with critical build problems.
    pub failed_to_finish: u64,
    /// Well-known problem counters plus their TOTAL.
    pub problems: ProblemCounts,
    /// Top-K slowest tests by average duration.
    pub top_slow: Vec<TestRank>,
    /// Top-K log-heaviest tests by byte count.
    pub top_log: Vec<TestRank>,
    /// Per-suite breakdown of non-successful builds.
    pub suites: Vec<SuiteStatus>,
    /// Total chain duration in milliseconds (root build wall clock).
    pub duration_ms: i64,
    /// Set when one or more referenced dependencies could not be fetched;
    /// the rest of the summary is still usable.
    pub deps_not_found: bool,
}

/// Outcome of a chain status request as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainOutcome {
    /// The chain was found and summarized (possibly partially).
    Status(Box<AggregatedChainStatus>),
    /// The root build does not exist, in cache or upstream.
    ChainNotFound,
    /// The caller's credentials lack rights for the requested server.
    AccessDenied,
}
