// Raw REST DTOs as the CI server ships them, plus compaction into the
// interned BuildRecord form.

use chrono::DateTime;
use serde::Deserialize;

use crate::interner::StringInterner;
use crate::types::{BuildId, BuildRecord, TestEntry};

/// TeamCity timestamp format, e.g. `20190205T201633+0300`.
const TS_FORMAT: &str = "%Y%m%dT%H%M%S%z";

/// One build as returned by `/app/rest/builds/id:<id>`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBuild {
    pub id: i32,
    #[serde(rename = "buildTypeId")]
    pub build_type_id: String,
    #[serde(rename = "buildType", default)]
    pub build_type: Option<RawBuildType>,
    #[serde(rename = "branchName", default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "startDate", default)]
    pub start_date: Option<String>,
    #[serde(rename = "finishDate", default)]
    pub finish_date: Option<String>,
    #[serde(rename = "snapshot-dependencies", default)]
    pub snapshot_dependencies: Option<RawBuildRefs>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBuildType {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBuildRefs {
    #[serde(default)]
    pub build: Vec<RawBuildRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBuildRef {
    pub id: i32,
}

/// One test occurrence from `/app/rest/testOccurrences`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTestOccurrence {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Duration in milliseconds.
    #[serde(default)]
    pub duration: i64,
    /// Bytes of log output attributed to this test, where known.
    #[serde(rename = "logSize", default)]
    pub log_size: i64,
}

/// One problem occurrence from `/app/rest/problemOccurrences`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProblem {
    #[serde(rename = "type")]
    pub problem_type: String,
}

impl RawBuild {
    /// Snapshot-dependency ids in upstream order.
    pub fn dependency_ids(&self) -> Vec<BuildId> {
        self.snapshot_dependencies
            .as_ref()
            .map(|deps| deps.build.iter().map(|b| BuildId(b.id)).collect())
            .unwrap_or_default()
    }

    /// Compact this build into the interned record form. Tests and problems
    /// are appended separately while the record is assembled.
    pub fn compact(&self, interner: &StringInterner) -> BuildRecord {
        let start_ts_ms = self
            .start_date
            .as_deref()
            .and_then(parse_upstream_ts)
            .unwrap_or(0);
        let finish_ts_ms = self.finish_date.as_deref().and_then(parse_upstream_ts);
        let name = self
            .build_type
            .as_ref()
            .and_then(|bt| bt.name.as_deref())
            .unwrap_or(&self.build_type_id);

        BuildRecord {
            id: BuildId(self.id),
            build_type: interner.intern(&self.build_type_id),
            name: interner.intern(name),
            branch: interner.intern(self.branch_name.as_deref().unwrap_or("<default>")),
            status: interner.intern(self.status.as_deref().unwrap_or("UNKNOWN")),
            state: interner.intern(self.state.as_deref().unwrap_or("finished")),
            start_ts_ms,
            duration_ms: finish_ts_ms.map_or(0, |f| (f - start_ts_ms).max(0)),
            dependencies: self.dependency_ids(),
            tests: Vec::new(),
            problems: Vec::new(),
        }
    }
}

impl RawTestOccurrence {
    pub fn compact(&self, interner: &StringInterner) -> TestEntry {
        TestEntry {
            name: interner.intern(&self.name),
            status: interner.intern(self.status.as_deref().unwrap_or("UNKNOWN")),
            duration_ms: self.duration,
            log_size: self.log_size,
        }
    }
}

fn parse_upstream_ts(s: &str) -> Option<i64> {
    DateTime::parse_from_str(s, TS_FORMAT)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
