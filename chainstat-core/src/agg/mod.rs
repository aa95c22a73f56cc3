//! Chain aggregation: reduce an expanded chain to one
//! [`AggregatedChainStatus`].
//!
//! All counting happens over interned codes; strings are resolved once at
//! the edge when the summary is assembled. The summary is computed fresh per
//! request and never persisted.

pub mod build_stats;
pub mod history;

use std::collections::HashMap;

use crate::chain::ChainExpansion;
use crate::config::AggregationSection;
use crate::interner::StringInterner;
use crate::types::{
    AggregatedChainStatus, KnownCodes, StrCode, SuiteStatus, TestFailure, TestRank,
};

use history::TestHistory;

/// Per-test accumulator for the duration and log rankings, in first-encounter
/// order.
struct TestAgg {
    name: StrCode,
    suite: StrCode,
    total_ms: i64,
    runs: i64,
    log_bytes: i64,
}

impl TestAgg {
    fn avg_ms(&self) -> i64 {
        if self.runs == 0 { 0 } else { self.total_ms / self.runs }
    }
}

/// Reduce one expanded chain to its aggregate status.
///
/// Counting rules:
/// - failed tests: failing test entries across dependency builds, root
///   excluded (the root is a composite and repeats its children's results);
/// - failed to finish: builds with non-success status and at least one
///   critical problem (test-failure and snapshot-dependency markers do not
///   count);
/// - problem counters: the four well-known categories plus their TOTAL, see
///   [`build_stats::problem_counts`];
/// - rankings: top-K by average duration and by log bytes, ties broken by
///   encounter order;
/// - new-failure classification degrades to `true` when baseline history is
///   unavailable.
pub async fn summarize(
    expansion: &ChainExpansion,
    interner: &StringInterner,
    codes: &KnownCodes,
    history: &dyn TestHistory,
    opts: &AggregationSection,
) -> crate::error::Result<AggregatedChainStatus> {
    let root = expansion.root();
    let root_id = root.id;
    let branch = interner.resolve(root.branch)?;

    let mut failed_tests: u64 = 0;
    let mut failed_to_finish: u64 = 0;
    let mut aggs: Vec<TestAgg> = Vec::new();
    // Rankings are per (suite, test) pair: the same test name under two
    // suites is two entries, not one blended average.
    let mut agg_index: HashMap<(StrCode, StrCode), usize> = HashMap::new();
    let mut suites: Vec<SuiteStatus> = Vec::new();

    for record in &expansion.records {
        let is_root = record.id == root_id;

        for test in &record.tests {
            let slot = *agg_index.entry((record.name, test.name)).or_insert_with(|| {
                aggs.push(TestAgg {
                    name: test.name,
                    suite: record.name,
                    total_ms: 0,
                    runs: 0,
                    log_bytes: 0,
                });
                aggs.len() - 1
            });
            aggs[slot].total_ms += test.duration_ms;
            aggs[slot].runs += 1;
            aggs[slot].log_bytes += test.log_size;

            if !is_root && test.status == codes.failure {
                failed_tests += 1;
            }
        }

        if !is_root && record.failed_to_finish(codes) {
            failed_to_finish += 1;
        }

        if !is_root && !record.is_success(codes) {
            let mut test_failures = Vec::new();
            for test in &record.tests {
                if test.status != codes.failure {
                    continue;
                }
                let name = interner.resolve(test.name)?;
                let seen = history
                    .seen_on_branch(&name, &opts.baseline_branch, opts.history_lookback_builds)
                    .await;
                test_failures.push(TestFailure {
                    name,
                    // Unknown history reads as new: a possibly-new failure
                    // is blocker-worthy until proven otherwise.
                    new_failure: !seen.unwrap_or(false),
                });
            }
            suites.push(SuiteStatus {
                suite: interner.resolve(record.name)?,
                status: interner.resolve(record.status)?,
                failed_to_finish: record.failed_to_finish(codes),
                test_failures,
            });
        }
    }

    let top_slow = top_k_by(&aggs, opts.top_k, TestAgg::avg_ms);
    let top_slow = resolve_ranks(top_slow, TestAgg::avg_ms, interner)?;
    let top_log = top_k_by(&aggs, opts.top_k, |a| a.log_bytes);
    let top_log = resolve_ranks(top_log, |a| a.log_bytes, interner)?;

    Ok(AggregatedChainStatus {
        root_id,
        branch,
        failed_tests,
        failed_to_finish,
        problems: build_stats::problem_counts(&expansion.records, codes),
        top_slow,
        top_log,
        suites,
        duration_ms: root.duration_ms,
        deps_not_found: expansion.has_missing(),
    })
}

/// Stable partial selection of the `k` largest items by `key`: no full sort,
/// ties keep encounter order.
pub(crate) fn top_k_by<'a, T, K>(items: &'a [T], k: usize, key: K) -> Vec<&'a T>
where
    K: Fn(&T) -> i64,
{
    if k == 0 {
        return Vec::new();
    }
    let mut top: Vec<&T> = Vec::with_capacity(k + 1);
    for item in items {
        let value = key(item);
        if top.len() == k && value <= key(top[k - 1]) {
            continue;
        }
        let pos = top
            .iter()
            .position(|t| key(t) < value)
            .unwrap_or(top.len());
        top.insert(pos, item);
        if top.len() > k {
            top.pop();
        }
    }
    top
}

fn resolve_ranks<K>(
    selected: Vec<&TestAgg>,
    key: K,
    interner: &StringInterner,
) -> crate::error::Result<Vec<TestRank>>
where
    K: Fn(&TestAgg) -> i64,
{
    selected
        .into_iter()
        .map(|agg| {
            Ok(TestRank {
                suite: interner.resolve(agg.suite)?,
                test: interner.resolve(agg.name)?,
                value: key(agg),
            })
        })
        .collect()
}
