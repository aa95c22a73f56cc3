// Per-chain problem statistics and printable durations, derived from one
// expansion and rendered alongside the aggregate status.

use serde::{Deserialize, Serialize};

use crate::types::{AggregatedChainStatus, BuildId, BuildRecord, KnownCodes, ProblemCounts};

/// Count the well-known problem categories over a set of build records.
///
/// TOTAL is the sum of the four named counters only; unclassified problem
/// types are excluded on purpose. The counters describe known risk
/// categories, not every registered problem.
pub fn problem_counts(records: &[BuildRecord], codes: &KnownCodes) -> ProblemCounts {
    let mut counts = ProblemCounts::default();
    for record in records {
        for &problem in &record.problems {
            if problem == codes.execution_timeout {
                counts.execution_timeout += 1;
            } else if problem == codes.jvm_crash {
                counts.jvm_crash += 1;
            } else if problem == codes.oome {
                counts.oome += 1;
            } else if problem == codes.exit_code {
                counts.exit_code += 1;
            }
        }
    }
    counts.total =
        counts.execution_timeout + counts.jvm_crash + counts.oome + counts.exit_code;
    counts
}

/// Compact per-chain statistics for one root build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub root_id: BuildId,
    pub problems: ProblemCounts,
    /// Root build wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

impl BuildStats {
    pub fn from_status(status: &AggregatedChainStatus) -> Self {
        Self {
            root_id: status.root_id,
            problems: status.problems,
            duration_ms: status.duration_ms,
        }
    }

    /// Short-name counter map as rendered to users (ET/JC/OO/EC/TT).
    pub fn short_names(&self) -> Vec<(&'static str, u64)> {
        self.problems.short_names()
    }

    pub fn printable_duration(&self) -> String {
        format_duration_ms(self.duration_ms)
    }
}

/// Render a millisecond duration as `2h 41m 5s`, dropping leading zero
/// units.
pub fn format_duration_ms(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::StringInterner;
    use crate::types::{STATUS_FAILURE, StrCode};

    fn record_with_problems(interner: &StringInterner, id: i32, problems: Vec<StrCode>) -> BuildRecord {
        BuildRecord {
            id: BuildId(id),
            build_type: interner.intern("Suite"),
            name: interner.intern("Suite"),
            branch: interner.intern("master"),
            status: interner.intern(STATUS_FAILURE),
            state: interner.intern("finished"),
            start_ts_ms: 0,
            duration_ms: 9_665_000,
            dependencies: Vec::new(),
            tests: Vec::new(),
            problems,
        }
    }

    #[test]
    fn total_counts_only_known_categories() {
        let interner = StringInterner::new();
        let codes = KnownCodes::intern(&interner);
        let other = interner.intern("TC_COMPILATION_ERROR");

        let records = vec![
            record_with_problems(&interner, 1, vec![codes.exit_code, other]),
            record_with_problems(&interner, 2, vec![codes.oome, codes.oome]),
            record_with_problems(&interner, 3, vec![codes.failed_tests]),
        ];
        let counts = problem_counts(&records, &codes);
        assert_eq!(counts.exit_code, 1);
        assert_eq!(counts.oome, 2);
        assert_eq!(counts.execution_timeout, 0);
        assert_eq!(counts.jvm_crash, 0);
        // Compilation error and the test-failure marker stay out of TOTAL.
        assert_eq!(counts.total, 3);
    }

    #[test]
    fn stats_pull_duration_from_root() {
        let interner = StringInterner::new();
        let codes = KnownCodes::intern(&interner);
        let records = vec![record_with_problems(&interner, 1, vec![codes.jvm_crash])];
        let status = AggregatedChainStatus {
            root_id: BuildId(1),
            branch: "master".to_string(),
            failed_tests: 0,
            failed_to_finish: 1,
            problems: problem_counts(&records, &codes),
            top_slow: Vec::new(),
            top_log: Vec::new(),
            suites: Vec::new(),
            duration_ms: records[0].duration_ms,
            deps_not_found: false,
        };
        let stats = BuildStats::from_status(&status);
        assert_eq!(stats.root_id, BuildId(1));
        assert_eq!(stats.problems.jvm_crash, 1);
        assert_eq!(stats.printable_duration(), "2h 41m 5s");
        assert!(stats.short_names().contains(&("TT", 1)));
    }

    #[test]
    fn duration_rendering_drops_leading_zero_units() {
        assert_eq!(format_duration_ms(0), "0s");
        assert_eq!(format_duration_ms(999), "0s");
        assert_eq!(format_duration_ms(61_000), "1m 1s");
        assert_eq!(format_duration_ms(3_600_000), "1h 0m 0s");
        assert_eq!(format_duration_ms(-5), "0s");
    }
}
